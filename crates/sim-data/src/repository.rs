//! SQLite-backed candle repository.
//!
//! Two read paths back the `CandleStore` contract: a lazy cursor that
//! holds its own read-only connection and fetches ascending batches, and a
//! preload path that materializes the full range into a shared cache so no
//! store-side cursor stays open. Preloaded ranges are reused across
//! parameter sets until `clear_caches`.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use sim_core::candle::Candle;
use sim_core::error::SimError;
use sim_core::store::{CandleSource, CandleStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS candles (
    symbol     TEXT    NOT NULL,
    open_time  INTEGER NOT NULL,
    close_time INTEGER NOT NULL,
    open       REAL    NOT NULL,
    high       REAL    NOT NULL,
    low        REAL    NOT NULL,
    close      REAL    NOT NULL,
    volume     REAL    NOT NULL,
    PRIMARY KEY (symbol, open_time)
)";

/// Rows fetched per cursor batch.
const CURSOR_BATCH: usize = 1024;

fn db_err(e: rusqlite::Error) -> SimError {
    SimError::Store(e.to_string())
}

type RangeKey = (String, i64, i64);

pub struct CandleRepository {
    db_path: PathBuf,
    cache: Mutex<FxHashMap<RangeKey, Arc<Vec<Candle>>>>,
}

impl CandleRepository {
    /// Open (creating the schema if needed) a repository at `path`.
    pub fn open(path: &Path) -> Result<Self, SimError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            db_path: path.to_path_buf(),
            cache: Mutex::new(FxHashMap::default()),
        })
    }

    fn connect_read(&self) -> Result<Connection, SimError> {
        Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(db_err)
    }

    /// Insert candles, ignoring rows whose (symbol, open_time) already
    /// exists. Returns the number of new rows.
    pub fn store_candles(&self, symbol: &str, candles: &[Candle]) -> Result<usize, SimError> {
        let mut conn = Connection::open(&self.db_path).map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO candles \
                     (symbol, open_time, close_time, open, high, low, close, volume) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(db_err)?;
            for c in candles {
                inserted += stmt
                    .execute(params![
                        symbol,
                        c.open_time,
                        c.close_time,
                        c.open,
                        c.high,
                        c.low,
                        c.close,
                        c.volume,
                    ])
                    .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(inserted)
    }

    /// Open time of the newest stored candle for `symbol`, if any.
    pub fn last_open_time(&self, symbol: &str) -> Result<Option<i64>, SimError> {
        let conn = self.connect_read()?;
        conn.query_row(
            "SELECT MAX(open_time) FROM candles WHERE symbol = ?1",
            [symbol],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(db_err)
    }

    pub fn count_candles(&self, symbol: &str) -> Result<u64, SimError> {
        let conn = self.connect_read()?;
        conn.query_row(
            "SELECT COUNT(*) FROM candles WHERE symbol = ?1",
            [symbol],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    fn load_range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<Candle>, SimError> {
        let conn = self.connect_read()?;
        let mut stmt = conn
            .prepare(
                "SELECT open_time, close_time, open, high, low, close, volume \
                 FROM candles \
                 WHERE symbol = ?1 AND open_time >= ?2 AND open_time <= ?3 \
                 ORDER BY open_time ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![symbol, start_ms, end_ms], row_to_candle)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}

fn row_to_candle(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candle> {
    Ok(Candle {
        open_time: row.get(0)?,
        close_time: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
    })
}

impl CandleStore for CandleRepository {
    fn iterate(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        preload: bool,
    ) -> Result<CandleSource, SimError> {
        if preload {
            let key: RangeKey = (symbol.to_string(), start_ms, end_ms);
            let cached = self.cache.lock().get(&key).cloned();
            let data = match cached {
                Some(data) => data,
                None => {
                    let data = Arc::new(self.load_range(symbol, start_ms, end_ms)?);
                    debug!(symbol, bars = data.len(), "preloaded candle range");
                    self.cache.lock().insert(key, Arc::clone(&data));
                    data
                }
            };
            Ok(Box::new(PreloadedCandles { data, idx: 0 }))
        } else {
            let cursor = CandleCursor::open(self.connect_read()?, symbol, start_ms, end_ms)?;
            Ok(Box::new(cursor))
        }
    }

    fn known_symbols(&self) -> Result<BTreeSet<String>, SimError> {
        let conn = self.connect_read()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM candles ORDER BY symbol")
            .map_err(db_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
        rows.collect::<Result<BTreeSet<String>, _>>().map_err(db_err)
    }

    fn clear_caches(&self) {
        self.cache.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Preloaded source
// ---------------------------------------------------------------------------

/// Owning iterator over a cached candle range.
struct PreloadedCandles {
    data: Arc<Vec<Candle>>,
    idx: usize,
}

impl Iterator for PreloadedCandles {
    type Item = Candle;

    fn next(&mut self) -> Option<Candle> {
        let candle = self.data.get(self.idx).copied();
        self.idx += 1;
        candle
    }
}

// ---------------------------------------------------------------------------
// Lazy cursor
// ---------------------------------------------------------------------------

/// Streaming source holding its own read-only connection.
///
/// The first batch is fetched eagerly so that a broken store surfaces as a
/// load failure; a query error after that is logged and truncates the
/// stream.
struct CandleCursor {
    conn: Connection,
    symbol: String,
    next_from: i64,
    end_ms: i64,
    buffer: VecDeque<Candle>,
    exhausted: bool,
}

impl CandleCursor {
    fn open(conn: Connection, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Self, SimError> {
        let mut cursor = Self {
            conn,
            symbol: symbol.to_string(),
            next_from: start_ms,
            end_ms,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        let first = cursor.query_batch()?;
        cursor.absorb_batch(first);
        Ok(cursor)
    }

    fn query_batch(&self) -> Result<Vec<Candle>, SimError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT open_time, close_time, open, high, low, close, volume \
                 FROM candles \
                 WHERE symbol = ?1 AND open_time >= ?2 AND open_time <= ?3 \
                 ORDER BY open_time ASC \
                 LIMIT ?4",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![self.symbol, self.next_from, self.end_ms, CURSOR_BATCH as i64],
                row_to_candle,
            )
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn absorb_batch(&mut self, batch: Vec<Candle>) {
        if batch.len() < CURSOR_BATCH {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            // (symbol, open_time) is the primary key, so +1 cannot skip.
            self.next_from = last.open_time + 1;
        }
        self.buffer.extend(batch);
    }
}

impl Iterator for CandleCursor {
    type Item = Candle;

    fn next(&mut self) -> Option<Candle> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.query_batch() {
                Ok(batch) => self.absorb_batch(batch),
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, "candle cursor failed, truncating stream");
                    self.exhausted = true;
                }
            }
        }
        self.buffer.pop_front()
    }
}
