/// AuditStore: SQLite-backed append-only hash-chained command audit trail.
use std::path::Path;

use chrono::DateTime;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use tally_types::{AuditEvent, TallyError};

use crate::entry::AuditRecord;

/// The sentinel value used as prev_hash for the very first record.
pub const GENESIS_HASH: &str = "genesis";

const SELECT_COLUMNS: &str = "entry_id, timestamp, scope_id, actor_id, command, args, status, \
                              detail, message_id, prev_hash, entry_hash";

/// The result of verifying the ledger's hash chain.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Total number of records inspected.
    pub total_entries: usize,
    /// Whether the entire chain is valid.
    pub valid: bool,
    /// Index of the first record whose hash or chain link is invalid, if any.
    pub first_invalid_entry: Option<usize>,
    /// Human-readable summary of the verification result.
    pub message: String,
}

/// An append-only, hash-chained audit store backed by SQLite.
pub struct AuditStore {
    conn: Connection,
    latest_hash: String,
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore")
            .field("latest_hash", &self.latest_hash)
            .finish_non_exhaustive()
    }
}

impl AuditStore {
    /// Open (or create) the audit ledger at the given path.
    ///
    /// Enables WAL mode, creates the `command_audit` table and indices if
    /// they do not exist, and reads the chain tip (or uses "genesis").
    pub fn open(path: &Path) -> Result<Self, TallyError> {
        let conn = Connection::open(path)
            .map_err(|e| TallyError::LedgerError(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| TallyError::LedgerError(format!("failed to set WAL mode: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS command_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                scope_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                command TEXT NOT NULL,
                args TEXT NOT NULL,
                status TEXT NOT NULL,
                detail TEXT,
                message_id TEXT,
                prev_hash TEXT NOT NULL,
                entry_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON command_audit(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_actor ON command_audit(actor_id);
            CREATE INDEX IF NOT EXISTS idx_audit_scope ON command_audit(scope_id);",
        )
        .map_err(|e| TallyError::LedgerError(format!("failed to create schema: {e}")))?;

        let latest_hash: String = conn
            .query_row(
                "SELECT entry_hash FROM command_audit ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or_else(|_| GENESIS_HASH.to_string());

        info!(latest_hash = %latest_hash, "audit store opened");

        Ok(Self { conn, latest_hash })
    }

    /// Hash of the most recent record, or "genesis" for an empty ledger.
    pub fn latest_hash(&self) -> &str {
        &self.latest_hash
    }

    /// Append an event, chaining it onto the current tip.
    pub fn append(&mut self, event: &AuditEvent) -> Result<AuditRecord, TallyError> {
        let record = AuditRecord::new(event, self.latest_hash.clone())?;

        self.conn
            .execute(
                "INSERT INTO command_audit (entry_id, timestamp, scope_id, actor_id, command,
                     args, status, detail, message_id, prev_hash, entry_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.entry_id.to_string(),
                    record.timestamp.to_rfc3339(),
                    record.scope_id,
                    record.actor_id,
                    record.command,
                    record.args,
                    record.status,
                    record.detail,
                    record.message_id,
                    record.prev_hash,
                    record.entry_hash,
                ],
            )
            .map_err(|e| TallyError::LedgerError(format!("failed to insert record: {e}")))?;

        self.latest_hash = record.entry_hash.clone();
        Ok(record)
    }

    /// Return the last `n` records, most recent first.
    pub fn query_last(&self, n: usize) -> Result<Vec<AuditRecord>, TallyError> {
        self.query(
            &format!("SELECT {SELECT_COLUMNS} FROM command_audit ORDER BY id DESC LIMIT ?1"),
            params![n as i64],
            "query_last",
        )
    }

    /// Return the last `n` records for one actor, most recent first.
    pub fn query_actor(&self, actor_id: &str, n: usize) -> Result<Vec<AuditRecord>, TallyError> {
        self.query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM command_audit \
                 WHERE actor_id = ?1 ORDER BY id DESC LIMIT ?2"
            ),
            params![actor_id, n as i64],
            "query_actor",
        )
    }

    /// Return the total number of records in the ledger.
    pub fn count(&self) -> Result<usize, TallyError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM command_audit", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| c as usize)
            .map_err(|e| TallyError::LedgerError(format!("count failed: {e}")))
    }

    /// Verify the integrity of the entire hash chain.
    ///
    /// Reads every record in insertion order and checks:
    /// 1. Each record's `prev_hash` equals the preceding record's
    ///    `entry_hash` (or "genesis" for the first record).
    /// 2. Each record's hash matches its recomputed value.
    pub fn verify_integrity(&self) -> Result<IntegrityReport, TallyError> {
        let records = self.query(
            &format!("SELECT {SELECT_COLUMNS} FROM command_audit ORDER BY id ASC"),
            [],
            "verify_integrity",
        )?;

        let total_entries = records.len();
        if total_entries == 0 {
            return Ok(IntegrityReport {
                total_entries: 0,
                valid: true,
                first_invalid_entry: None,
                message: "ledger is empty".to_string(),
            });
        }

        let mut expected_prev_hash = GENESIS_HASH.to_string();

        for (i, record) in records.iter().enumerate() {
            if record.prev_hash != expected_prev_hash {
                return Ok(IntegrityReport {
                    total_entries,
                    valid: false,
                    first_invalid_entry: Some(i),
                    message: format!(
                        "chain broken at entry {i}: expected prev_hash \
                         '{expected_prev_hash}', found '{}'",
                        record.prev_hash
                    ),
                });
            }

            let recomputed = record.recompute_hash();
            if record.entry_hash != recomputed {
                return Ok(IntegrityReport {
                    total_entries,
                    valid: false,
                    first_invalid_entry: Some(i),
                    message: format!(
                        "hash mismatch at entry {i}: stored '{}', computed '{recomputed}'",
                        record.entry_hash
                    ),
                });
            }

            expected_prev_hash = record.entry_hash.clone();
        }

        Ok(IntegrityReport {
            total_entries,
            valid: true,
            first_invalid_entry: None,
            message: format!("all {total_entries} entries verified successfully"),
        })
    }

    fn query<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
        op: &str,
    ) -> Result<Vec<AuditRecord>, TallyError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| TallyError::LedgerError(format!("{op} prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params, row_to_record)
            .map_err(|e| TallyError::LedgerError(format!("{op} failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| TallyError::LedgerError(format!("{op} read failed: {e}")))
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Map a SQLite row to an AuditRecord.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRecord> {
    let entry_id = Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| conversion_error(0, e))?;
    let timestamp = DateTime::parse_from_rfc3339(&row.get::<_, String>(1)?)
        .map_err(|e| conversion_error(1, e))?
        .into();
    Ok(AuditRecord {
        entry_id,
        timestamp,
        scope_id: row.get(2)?,
        actor_id: row.get(3)?,
        command: row.get(4)?,
        args: row.get(5)?,
        status: row.get(6)?,
        detail: row.get(7)?,
        message_id: row.get(8)?,
        prev_hash: row.get(9)?,
        entry_hash: row.get(10)?,
    })
}
