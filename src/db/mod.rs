//! Persistence of filtering results to SQLite.

use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::core::locator::FileRef;
use crate::processors::filter::FilterResult;

/// Errors raised by result persistence.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Destination for per-file filtering outcomes.
///
/// `persist` replaces any previous row for the same file, so re-running a
/// cruise converges to the latest results instead of accumulating
/// duplicates.
pub trait ResultSink {
    /// Store one file's result and its focused particle records.
    fn persist(&mut self, result: &FilterResult) -> Result<()>;

    /// Record that a file could not be processed.
    fn record_failure(&mut self, file: &FileRef, error: &str) -> Result<()>;

    /// Build query indexes after a bulk run.
    fn build_indexes(&mut self) -> Result<()>;
}

/// SQLite-backed sink.
///
/// The `filter_files` table holds one row per input file with the
/// calibration actually used; `opp` holds the focused particle records.
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS filter_files (
                cruise TEXT NOT NULL,
                file TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                total INTEGER NOT NULL,
                focused INTEGER NOT NULL,
                notch1 REAL,
                notch2 REAL,
                width REAL,
                origin REAL,
                signal_offset REAL,
                error TEXT,
                filtered_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (cruise, file)
            );
            CREATE TABLE IF NOT EXISTS opp (
                cruise TEXT NOT NULL,
                file TEXT NOT NULL,
                time INTEGER NOT NULL,
                pulse_width INTEGER NOT NULL,
                d1 INTEGER NOT NULL,
                d2 INTEGER NOT NULL,
                fsc_small INTEGER NOT NULL,
                fsc_perp INTEGER NOT NULL,
                fsc_big INTEGER NOT NULL,
                pe INTEGER NOT NULL,
                chl_small INTEGER NOT NULL,
                chl_big INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Focused particle count stored for one file, if present.
    pub fn focused_count(&self, cruise: &str, file: &str) -> Result<Option<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT focused FROM filter_files WHERE cruise = ?1 AND file = ?2")?;
        let mut rows = stmt.query(params![cruise, file])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Total opp rows stored for a cruise.
    pub fn opp_count(&self, cruise: &str) -> Result<u64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM opp WHERE cruise = ?1",
            params![cruise],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl ResultSink for SqliteSink {
    fn persist(&mut self, result: &FilterResult) -> Result<()> {
        let name = result.file.file_name().to_string();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO filter_files
                (cruise, file, ordinal, total, focused,
                 notch1, notch2, width, origin, signal_offset, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
            params![
                result.file.cruise,
                name,
                result.file.ordinal as i64,
                result.total as i64,
                result.focused as i64,
                result.params.notch1,
                result.params.notch2,
                result.params.width,
                result.params.origin,
                result.params.offset,
            ],
        )?;

        tx.execute(
            "DELETE FROM opp WHERE cruise = ?1 AND file = ?2",
            params![result.file.cruise, name],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO opp
                    (cruise, file, time, pulse_width, d1, d2,
                     fsc_small, fsc_perp, fsc_big, pe, chl_small, chl_big)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for r in &result.records {
                stmt.execute(params![
                    result.file.cruise,
                    name,
                    r.time,
                    r.pulse_width,
                    r.d1,
                    r.d2,
                    r.fsc_small,
                    r.fsc_perp,
                    r.fsc_big,
                    r.pe,
                    r.chl_small,
                    r.chl_big,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn record_failure(&mut self, file: &FileRef, error: &str) -> Result<()> {
        let name = file.file_name().to_string();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO filter_files
                (cruise, file, ordinal, total, focused, error)
             VALUES (?1, ?2, ?3, 0, 0, ?4)",
            params![file.cruise, name, file.ordinal as i64, error],
        )?;
        // A failure replaces any earlier success for the file, so its
        // previous focused rows go too.
        tx.execute(
            "DELETE FROM opp WHERE cruise = ?1 AND file = ?2",
            params![file.cruise, name],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn build_indexes(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_opp_cruise_file ON opp (cruise, file);
             CREATE INDEX IF NOT EXISTS idx_filter_files_cruise ON filter_files (cruise);",
        )?;
        Ok(())
    }
}
