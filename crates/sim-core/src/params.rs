//! Parameter sets and sweep-axis expansion.
//!
//! A parameter set is a labeled list of dot-path overrides applied to a
//! cloned strategy config; a sweep spec expands into the cartesian product
//! of its axes. Runs are independent and executed sequentially.

use serde::Deserialize;
use tracing::warn;

use crate::config::StrategyConfig;

// ---------------------------------------------------------------------------
// Parameter set
// ---------------------------------------------------------------------------

/// One snapshot of tunable strategy inputs.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub overrides: Vec<(String, f64)>,
}

impl Parameters {
    /// The empty parameter set used for single runs.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.overrides.is_empty()
    }

    /// "path=value" pairs joined with spaces; empty label for `none()`.
    pub fn label(&self) -> String {
        self.overrides
            .iter()
            .map(|(path, value)| format!("{path}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Apply the overrides to a cloned base config.
    pub fn apply_to(&self, base: &StrategyConfig) -> StrategyConfig {
        let mut cfg = base.clone();
        for (path, value) in &self.overrides {
            apply_one(&mut cfg, path, *value);
        }
        cfg
    }
}

/// Set a single config value by dot-separated path. Integer fields are
/// cast from f64; unknown paths are logged and ignored.
fn apply_one(cfg: &mut StrategyConfig, path: &str, value: f64) {
    match path {
        "strategy.ema_fast_window" => cfg.ema_fast_window = value as usize,
        "strategy.ema_slow_window" => cfg.ema_slow_window = value as usize,
        "strategy.trade.allocation_pct" => cfg.trade.allocation_pct = value,
        "strategy.trade.fee_bps" => cfg.trade.fee_bps = value,
        "strategy.trade.min_notional_usd" => cfg.trade.min_notional_usd = value,
        _ => warn!(path, "unknown sweep parameter path, ignoring"),
    }
}

// ---------------------------------------------------------------------------
// Sweep specification (loaded from YAML)
// ---------------------------------------------------------------------------

/// A single axis in the parameter sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepAxis {
    /// Dot-separated config path, e.g. "strategy.ema_fast_window".
    pub path: String,
    /// Values to test along this axis.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepSpec {
    pub axes: Vec<SweepAxis>,
}

impl SweepSpec {
    /// Expand the axes into the full cartesian product of parameter sets.
    pub fn combinations(&self) -> Vec<Parameters> {
        generate_combinations(&self.axes)
            .into_iter()
            .map(|overrides| Parameters { overrides })
            .collect()
    }
}

fn generate_combinations(axes: &[SweepAxis]) -> Vec<Vec<(String, f64)>> {
    if axes.is_empty() {
        return vec![vec![]];
    }

    let sub = generate_combinations(&axes[1..]);
    let mut result = Vec::with_capacity(axes[0].values.len() * sub.len());
    for value in &axes[0].values {
        for combo in &sub {
            let mut with_head = vec![(axes[0].path.clone(), *value)];
            with_head.extend(combo.iter().cloned());
            result.push(with_head);
        }
    }
    result
}
