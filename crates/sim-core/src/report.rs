//! Per-run result reporting.

use serde::Serialize;

use crate::account::AccountManager;
use crate::params::Parameters;

/// End-of-run snapshot of one account, serializable to JSON.
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub client_id: String,
    pub reference_currency: String,
    /// Cash plus open positions marked at the last observed close.
    pub holdings: f64,
    pub balances: Vec<(String, f64)>,
    pub trades: u32,
    pub realized_pnl: f64,
    pub total_fees: f64,
}

/// Result of one parameter set.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// "path=value" pairs, empty for a plain run.
    pub parameters: String,
    pub candles_processed: u64,
    pub accounts: Vec<AccountReport>,
}

pub fn account_report(account: &AccountManager) -> AccountReport {
    let (trades, realized_pnl, total_fees) = account.all_trading_managers().iter().fold(
        (0u32, 0.0f64, 0.0f64),
        |(trades, pnl, fees), manager| {
            let manager = manager.lock();
            (
                trades + manager.trades().len() as u32,
                pnl + manager.realized_pnl(),
                fees + manager.total_fees(),
            )
        },
    );
    AccountReport {
        client_id: account.client_id().to_string(),
        reference_currency: account.reference_currency().to_string(),
        holdings: account.total_funds_in_reference_currency(),
        balances: account.balances(),
        trades,
        realized_pnl,
        total_fees,
    }
}

pub fn run_report(
    parameters: &Parameters,
    candles_processed: u64,
    accounts: &[AccountManager],
) -> RunReport {
    RunReport {
        parameters: parameters.label(),
        candles_processed,
        accounts: accounts.iter().map(account_report).collect(),
    }
}

/// Human-readable banner, one block per account.
pub fn print_run_report(report: &RunReport) {
    for account in &report.accounts {
        print!("-------");
        if !report.parameters.is_empty() {
            print!(" | Parameters: {}", report.parameters);
        }
        if !account.client_id.is_empty() {
            print!(" | Client: {}", account.client_id);
        }
        println!(" | -------");
        for (currency, balance) in &account.balances {
            println!("{currency}: {balance:.8}");
        }
        println!(
            "Approximate holdings: ${:.2} {}",
            account.holdings, account.reference_currency,
        );
    }
}
