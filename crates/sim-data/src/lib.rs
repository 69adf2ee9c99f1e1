pub mod backfill;
pub mod repository;

pub use backfill::{Exchange, HistoryBackfill};
pub use repository::CandleRepository;
