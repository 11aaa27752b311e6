//! SQLite mirror backend
//!
//! Durable copy of the ledger in three tables:
//! - `patients`: patient id, JSON list of block hashes, update time
//! - `health_records`: one row per sealed reading, the reading stored as
//!   JSON next to indexed patient/hash/index/timestamp columns
//! - `blockchain`: block metadata keyed by hash, plus the archived payload
//!
//! The database runs in WAL mode with a bounded busy timeout, so a second
//! reader never blocks the writer indefinitely.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, ToSql};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::records::{
    BlockRecord, CorruptRecord, PatientRecord, ReadingRecord, ReadingScan, RecordFilter,
    RecordSort,
};
use crate::store::{MirrorError, MirrorResult, MirrorStore};

/// Mirror backed by a single SQLite database file
pub struct SqliteMirror {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteMirror {
    /// Create or open a mirror at the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    /// * `busy_timeout` - How long a locked database is waited on before the
    ///   call reports `Unavailable`
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> MirrorResult<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening SQLite mirror");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MirrorError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // WAL for crash durability and concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(busy_timeout)?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Non-durable mirror for tests
    pub fn open_in_memory() -> MirrorResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn init_schema(conn: &Connection) -> MirrorResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                patient_id TEXT PRIMARY KEY,
                block_hashes TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS health_records (
                record_id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                block_hash TEXT NOT NULL,
                block_index INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                reading TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_health_records_patient ON health_records(patient_id);
            CREATE INDEX IF NOT EXISTS idx_health_records_block_hash ON health_records(block_hash);

            CREATE TABLE IF NOT EXISTS blockchain (
                hash TEXT PRIMARY KEY,
                block_index INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                previous_hash TEXT NOT NULL,
                patient_id TEXT NOT NULL,
                ciphertext BLOB,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_blockchain_index ON blockchain(block_index);
            CREATE INDEX IF NOT EXISTS idx_blockchain_patient ON blockchain(patient_id);
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> MirrorResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MirrorError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Get the database path (`None` for in-memory mirrors)
    pub fn db_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Execute raw SQL for testing purposes only
    ///
    /// **WARNING**: This method bypasses the store's invariants and should
    /// ONLY be used in tests to simulate corruption or out-of-band deletes.
    #[doc(hidden)]
    pub fn __test_execute_raw_sql(&self, sql: &str, params: &[&dyn ToSql]) -> MirrorResult<usize> {
        Ok(self.conn()?.execute(sql, params)?)
    }

    /// Delete every reading and block record, keeping the patients table.
    /// Returns the number of rows removed. Test use only.
    #[doc(hidden)]
    pub fn __test_clear_ledger_records(&self) -> MirrorResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM health_records", [])?
            + tx.execute("DELETE FROM blockchain", [])?;
        tx.commit()?;
        Ok(removed)
    }
}

fn filter_clause(filter: &RecordFilter, hash_col: &str) -> (String, Option<String>) {
    match filter {
        RecordFilter::All => (String::new(), None),
        RecordFilter::Patient(id) => ("WHERE patient_id = ?1".to_string(), Some(id.clone())),
        RecordFilter::BlockHash(hash) => {
            (format!("WHERE {} = ?1", hash_col), Some(hash.clone()))
        }
    }
}

fn bind(value: &Option<String>) -> Vec<&dyn ToSql> {
    value.iter().map(|v| v as &dyn ToSql).collect()
}

impl MirrorStore for SqliteMirror {
    fn find_patient(&self, patient_id: &str) -> MirrorResult<Option<PatientRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT patient_id, block_hashes, updated_at FROM patients WHERE patient_id = ?1",
                [patient_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((patient_id, hashes, updated_at)) => Ok(Some(PatientRecord {
                patient_id,
                block_hashes: serde_json::from_str(&hashes)?,
                updated_at,
            })),
            None => Ok(None),
        }
    }

    fn upsert_patient(&self, record: &PatientRecord) -> MirrorResult<()> {
        let hashes = serde_json::to_string(&record.block_hashes)?;
        self.conn()?.execute(
            r#"
            INSERT INTO patients (patient_id, block_hashes, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(patient_id) DO UPDATE SET
                block_hashes = excluded.block_hashes,
                updated_at = excluded.updated_at
            "#,
            params![record.patient_id, hashes, record.updated_at as i64],
        )?;
        Ok(())
    }

    fn delete_patient(&self, patient_id: &str) -> MirrorResult<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM patients WHERE patient_id = ?1", [patient_id])?;
        Ok(removed > 0)
    }

    fn list_patients(&self) -> MirrorResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT patient_id FROM patients ORDER BY patient_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn insert_reading_record(&self, record: &ReadingRecord) -> MirrorResult<String> {
        let reading = serde_json::to_string(&record.reading)?;
        self.conn()?.execute(
            r#"
            INSERT INTO health_records (
                record_id, patient_id, block_hash, block_index, timestamp, reading, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.record_id,
                record.reading.patient_id,
                record.block_hash,
                record.block_index as i64,
                record.reading.timestamp as i64,
                reading,
                record.created_at as i64,
            ],
        )?;

        debug!(record_id = %record.record_id, block_index = record.block_index, "Reading record stored");
        Ok(record.record_id.clone())
    }

    fn scan_readings(&self, filter: &RecordFilter, sort: RecordSort) -> MirrorResult<ReadingScan> {
        let (clause, value) = filter_clause(filter, "block_hash");
        let sql = format!(
            "SELECT record_id, block_hash, block_index, reading, created_at FROM health_records {} ORDER BY {}",
            clause,
            sort.order_by("timestamp", "block_index"),
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(bind(&value).as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)? as u64,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Parse per row so one damaged reading cannot hide the rest
        let mut scan = ReadingScan::default();
        for (record_id, block_hash, block_index, reading, created_at) in rows {
            match serde_json::from_str(&reading) {
                Ok(reading) => scan.records.push(ReadingRecord {
                    record_id,
                    reading,
                    block_hash,
                    block_index,
                    created_at,
                }),
                Err(e) => scan.corrupt.push(CorruptRecord {
                    record_id,
                    block_hash,
                    block_index,
                    error: e.to_string(),
                }),
            }
        }
        Ok(scan)
    }

    fn insert_block_record(&self, record: &BlockRecord) -> MirrorResult<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO blockchain (
                hash, block_index, timestamp, previous_hash, patient_id, ciphertext, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.hash,
                record.index as i64,
                record.timestamp as i64,
                record.previous_hash,
                record.patient_id,
                record.ciphertext,
                record.created_at as i64,
            ],
        )?;

        debug!(hash = %record.hash, index = record.index, "Block record stored");
        Ok(())
    }

    fn find_blocks(&self, filter: &RecordFilter, sort: RecordSort) -> MirrorResult<Vec<BlockRecord>> {
        let (clause, value) = filter_clause(filter, "hash");
        let sql = format!(
            "SELECT block_index, timestamp, hash, previous_hash, patient_id, ciphertext, created_at FROM blockchain {} ORDER BY {}",
            clause,
            sort.order_by("timestamp", "block_index"),
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let blocks = stmt
            .query_map(bind(&value).as_slice(), |row| {
                Ok(BlockRecord {
                    index: row.get::<_, i64>(0)? as u64,
                    timestamp: row.get::<_, i64>(1)? as u64,
                    hash: row.get(2)?,
                    previous_hash: row.get(3)?,
                    patient_id: row.get(4)?,
                    ciphertext: row.get(5)?,
                    created_at: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(blocks)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
