//! SQLite implementation of `WorkflowRepository`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use evalflow_core::audit::{AuditAction, AuditActor, AuditLogEntry};
use evalflow_core::record::{
    format_ite_number, EvaluationPayload, EvaluationRecord, RecordId, RecordPatch, User, UserId,
};
use evalflow_core::roles::Role;
use evalflow_core::status::WorkflowStatus;

use super::{NewAuditEntry, NewEvaluation, NewUser, RepositoryError, WorkflowRepository};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed workflow repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    /// Runs any pending migrations if the database exists but has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability (survives OS/power failure)
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // Set restrictive permissions on the database file (Unix only).
        // The payloads may contain commercially sensitive evaluation data.
        #[cfg(unix)]
        if path_str != ":memory:" && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // We must verify WAL mode was actually enabled - SQLite can silently
        // keep DELETE mode on some filesystems (e.g., network filesystems
        // that don't support shared memory). In-memory databases report
        // "memory" as the journal mode, which is fine for tests.
        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'. \
                     The database requires WAL mode for durability and concurrency \
                     guarantees.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Migration from version 0 (fresh database) to version 1.
        // No foreign key from audit_log to evaluations: audit entries outlive
        // the records they describe.
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    role TEXT NOT NULL
                        CHECK (role IN ('ADMIN', 'CREATOR', 'REVIEWER', 'APPROVER', 'VIEWER'))
                );

                CREATE TABLE IF NOT EXISTS evaluations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ite_number TEXT NOT NULL UNIQUE,
                    year INTEGER NOT NULL,
                    running_number INTEGER NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('DRAFT', 'PENDING_REVIEW', 'IN_REVIEW',
                                          'PENDING_APPROVAL', 'APPROVED', 'REJECTED')),
                    creator_id INTEGER NOT NULL,
                    reviewer_id INTEGER,
                    approver_id INTEGER,
                    submitted_at TEXT,
                    reviewed_at TEXT,
                    approved_at TEXT,
                    rejected_at TEXT,
                    rejection_reason TEXT,
                    payload_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (year, running_number)
                );

                CREATE INDEX IF NOT EXISTS idx_evaluations_status
                    ON evaluations(status);
                CREATE INDEX IF NOT EXISTS idx_evaluations_creator
                    ON evaluations(creator_id);

                CREATE TABLE IF NOT EXISTS audit_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    action TEXT NOT NULL
                        CHECK (action IN ('CREATE', 'UPDATE', 'DELETE', 'SUBMIT', 'RECALL',
                                          'MARK_REVIEWED', 'APPROVE', 'REJECT')),
                    old_status TEXT,
                    new_status TEXT,
                    comment TEXT,
                    metadata_json TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_audit_log_record
                    ON audit_log(record_id, id DESC);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

// =============================================================================
// Decoding helpers
// =============================================================================

fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::corruption(format!("{} timestamp", what)))
}

fn parse_opt_timestamp(
    value: Option<String>,
    what: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(|v| parse_timestamp(v, what)).transpose()
}

fn parse_status(value: &str) -> Result<WorkflowStatus, RepositoryError> {
    WorkflowStatus::parse(value).ok_or_else(|| RepositoryError::corruption("status column"))
}

fn parse_role(value: &str) -> Result<Role, RepositoryError> {
    Role::parse(value).ok_or_else(|| RepositoryError::corruption("role column"))
}

fn usize_to_i64(value: usize, operation: &'static str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("value {} exceeds maximum storable value", value),
        )
    })
}

/// Raw column values for one evaluations row, decoded in a second step so
/// the rusqlite row closure stays infallible with respect to our own errors.
struct RawRecord {
    id: i64,
    ite_number: String,
    year: i32,
    running_number: i64,
    status: String,
    creator_id: i64,
    reviewer_id: Option<i64>,
    approver_id: Option<i64>,
    submitted_at: Option<String>,
    reviewed_at: Option<String>,
    approved_at: Option<String>,
    rejected_at: Option<String>,
    rejection_reason: Option<String>,
    payload_json: String,
    created_at: String,
    updated_at: String,
}

const RECORD_COLUMNS: &str = "id, ite_number, year, running_number, status, creator_id, \
     reviewer_id, approver_id, submitted_at, reviewed_at, approved_at, rejected_at, \
     rejection_reason, payload_json, created_at, updated_at";

fn raw_record_from_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        ite_number: row.get(1)?,
        year: row.get(2)?,
        running_number: row.get(3)?,
        status: row.get(4)?,
        creator_id: row.get(5)?,
        reviewer_id: row.get(6)?,
        approver_id: row.get(7)?,
        submitted_at: row.get(8)?,
        reviewed_at: row.get(9)?,
        approved_at: row.get(10)?,
        rejected_at: row.get(11)?,
        rejection_reason: row.get(12)?,
        payload_json: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn decode_record(raw: RawRecord) -> Result<EvaluationRecord, RepositoryError> {
    let payload: EvaluationPayload = serde_json::from_str(&raw.payload_json)
        .map_err(|_| RepositoryError::corruption("payload JSON"))?;
    Ok(EvaluationRecord {
        id: RecordId(raw.id),
        ite_number: raw.ite_number,
        year: raw.year,
        running_number: raw.running_number,
        status: parse_status(&raw.status)?,
        creator_id: UserId(raw.creator_id),
        reviewer_id: raw.reviewer_id.map(UserId),
        approver_id: raw.approver_id.map(UserId),
        submitted_at: parse_opt_timestamp(raw.submitted_at, "submitted_at")?,
        reviewed_at: parse_opt_timestamp(raw.reviewed_at, "reviewed_at")?,
        approved_at: parse_opt_timestamp(raw.approved_at, "approved_at")?,
        rejected_at: parse_opt_timestamp(raw.rejected_at, "rejected_at")?,
        rejection_reason: raw.rejection_reason,
        payload,
        created_at: parse_timestamp(&raw.created_at, "created_at")?,
        updated_at: parse_timestamp(&raw.updated_at, "updated_at")?,
    })
}

fn encode_payload(payload: &EvaluationPayload) -> Result<String, RepositoryError> {
    serde_json::to_string(payload)
        .map_err(|e| RepositoryError::storage("serialize payload", e.to_string()))
}

struct RawAuditRow {
    id: i64,
    record_id: i64,
    user_id: i64,
    action: String,
    old_status: Option<String>,
    new_status: Option<String>,
    comment: Option<String>,
    metadata_json: Option<String>,
    created_at: String,
    actor_email: Option<String>,
    actor_name: Option<String>,
    actor_role: Option<String>,
}

const AUDIT_QUERY: &str = "SELECT a.id, a.record_id, a.user_id, a.action, a.old_status, \
     a.new_status, a.comment, a.metadata_json, a.created_at, u.email, u.name, u.role \
     FROM audit_log a LEFT JOIN users u ON u.id = a.user_id \
     WHERE a.record_id = ?1";

fn raw_audit_from_row(row: &Row<'_>) -> rusqlite::Result<RawAuditRow> {
    Ok(RawAuditRow {
        id: row.get(0)?,
        record_id: row.get(1)?,
        user_id: row.get(2)?,
        action: row.get(3)?,
        old_status: row.get(4)?,
        new_status: row.get(5)?,
        comment: row.get(6)?,
        metadata_json: row.get(7)?,
        created_at: row.get(8)?,
        actor_email: row.get(9)?,
        actor_name: row.get(10)?,
        actor_role: row.get(11)?,
    })
}

fn decode_audit(raw: RawAuditRow) -> Result<AuditLogEntry, RepositoryError> {
    let action = AuditAction::parse(&raw.action)
        .ok_or_else(|| RepositoryError::corruption("audit action column"))?;
    let metadata = raw
        .metadata_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|_| RepositoryError::corruption("audit metadata JSON"))?;
    let actor = match (raw.actor_email, raw.actor_name, raw.actor_role) {
        (Some(email), Some(name), Some(role)) => Some(AuditActor {
            id: UserId(raw.user_id),
            email,
            name,
            role: parse_role(&role)?,
        }),
        _ => None,
    };
    Ok(AuditLogEntry {
        id: raw.id,
        record_id: RecordId(raw.record_id),
        user_id: UserId(raw.user_id),
        action,
        old_status: raw.old_status.as_deref().map(parse_status).transpose()?,
        new_status: raw.new_status.as_deref().map(parse_status).transpose()?,
        comment: raw.comment,
        metadata,
        created_at: parse_timestamp(&raw.created_at, "audit created_at")?,
        actor,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_user(raw: (i64, String, String, String)) -> Result<User, RepositoryError> {
    Ok(User {
        id: UserId(raw.0),
        email: raw.1,
        name: raw.2,
        role: parse_role(&raw.3)?,
    })
}

// =============================================================================
// WorkflowRepository trait implementation
// =============================================================================

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn create_record(
        &self,
        new: NewEvaluation,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, RepositoryError> {
        let conn = self.conn.clone();
        let payload_json = encode_payload(&new.payload)?;
        let creator_id = new.creator_id.0;
        let payload = new.payload;

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("create record", e.to_string()))?;

            // The transaction makes MAX+1 safe against concurrent creates.
            let running_number: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(running_number), 0) + 1 FROM evaluations WHERE year = ?1",
                    params![year],
                    |row| row.get(0),
                )
                .map_err(|e| RepositoryError::storage("allocate running number", e.to_string()))?;

            let ite_number = format_ite_number(year, running_number);
            let now_str = now.to_rfc3339();
            tx.execute(
                "INSERT INTO evaluations (ite_number, year, running_number, status, creator_id,
                                          payload_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'DRAFT', ?4, ?5, ?6, ?6)",
                params![ite_number, year, running_number, creator_id, payload_json, now_str],
            )
            .map_err(|e| RepositoryError::storage("create record", e.to_string()))?;
            let id = tx.last_insert_rowid();

            tx.commit()
                .map_err(|e| RepositoryError::storage("create record", e.to_string()))?;

            Ok(EvaluationRecord {
                id: RecordId(id),
                ite_number,
                year,
                running_number,
                status: WorkflowStatus::Draft,
                creator_id: UserId(creator_id),
                reviewer_id: None,
                approver_id: None,
                submitted_at: None,
                reviewed_at: None,
                approved_at: None,
                rejected_at: None,
                rejection_reason: None,
                payload,
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .map_err(|e| RepositoryError::storage("create record", e.to_string()))?
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<EvaluationRecord>, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM evaluations WHERE id = ?1", RECORD_COLUMNS),
                    params![id.0],
                    raw_record_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get record", e.to_string()))?;
            raw.map(decode_record).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get record", e.to_string()))?
    }

    async fn list_records(&self) -> Result<Vec<EvaluationRecord>, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM evaluations ORDER BY created_at DESC, id DESC",
                    RECORD_COLUMNS
                ))
                .map_err(|e| RepositoryError::storage("list records", e.to_string()))?;
            let rows = stmt
                .query_map([], raw_record_from_row)
                .map_err(|e| RepositoryError::storage("list records", e.to_string()))?;
            let mut records = Vec::new();
            for row in rows {
                let raw =
                    row.map_err(|e| RepositoryError::storage("list records", e.to_string()))?;
                records.push(decode_record(raw)?);
            }
            Ok(records)
        })
        .await
        .map_err(|e| RepositoryError::storage("list records", e.to_string()))?
    }

    async fn update_record(
        &self,
        id: RecordId,
        patch: &RecordPatch,
        expected_status: Option<WorkflowStatus>,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, RepositoryError> {
        let conn = self.conn.clone();
        let patch = patch.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("update record", e.to_string()))?;

            let raw = tx
                .query_row(
                    &format!("SELECT {} FROM evaluations WHERE id = ?1", RECORD_COLUMNS),
                    params![id.0],
                    raw_record_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("update record", e.to_string()))?
                .ok_or(RepositoryError::NotFound)?;
            let mut record = decode_record(raw)?;

            if let Some(expected) = expected_status {
                if record.status != expected {
                    return Err(RepositoryError::StatusConflict {
                        actual: record.status,
                    });
                }
            }

            patch.apply(&mut record, now);
            let payload_json = encode_payload(&record.payload)?;

            tx.execute(
                "UPDATE evaluations SET
                     status = ?2, reviewer_id = ?3, approver_id = ?4, submitted_at = ?5,
                     reviewed_at = ?6, approved_at = ?7, rejected_at = ?8,
                     rejection_reason = ?9, payload_json = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    id.0,
                    record.status.as_str(),
                    record.reviewer_id.map(|r| r.0),
                    record.approver_id.map(|a| a.0),
                    record.submitted_at.map(|t| t.to_rfc3339()),
                    record.reviewed_at.map(|t| t.to_rfc3339()),
                    record.approved_at.map(|t| t.to_rfc3339()),
                    record.rejected_at.map(|t| t.to_rfc3339()),
                    record.rejection_reason,
                    payload_json,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| RepositoryError::storage("update record", e.to_string()))?;

            tx.commit()
                .map_err(|e| RepositoryError::storage("update record", e.to_string()))?;

            Ok(record)
        })
        .await
        .map_err(|e| RepositoryError::storage("update record", e.to_string()))?
    }

    async fn delete_record(&self, id: RecordId) -> Result<(), RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let affected = conn
                .execute("DELETE FROM evaluations WHERE id = ?1", params![id.0])
                .map_err(|e| RepositoryError::storage("delete record", e.to_string()))?;
            if affected == 0 {
                return Err(RepositoryError::NotFound);
            }
            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::storage("delete record", e.to_string()))?
    }

    async fn create_user(&self, new: NewUser) -> Result<User, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO users (email, name, role) VALUES (?1, ?2, ?3)",
                params![new.email, new.name, new.role.as_str()],
            )
            .map_err(|e| RepositoryError::storage("create user", e.to_string()))?;
            Ok(User {
                id: UserId(conn.last_insert_rowid()),
                email: new.email,
                name: new.name,
                role: new.role,
            })
        })
        .await
        .map_err(|e| RepositoryError::storage("create user", e.to_string()))?
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let raw = conn
                .query_row(
                    "SELECT id, email, name, role FROM users WHERE id = ?1",
                    params![id.0],
                    user_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get user", e.to_string()))?;
            raw.map(decode_user).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get user", e.to_string()))?
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let conn = self.conn.clone();
        let email = email.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let raw = conn
                .query_row(
                    "SELECT id, email, name, role FROM users WHERE email = ?1",
                    params![email],
                    user_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get user by email", e.to_string()))?;
            raw.map(decode_user).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("get user by email", e.to_string()))?
    }

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT id, email, name, role FROM users ORDER BY id")
                .map_err(|e| RepositoryError::storage("list users", e.to_string()))?;
            let rows = stmt
                .query_map([], user_from_row)
                .map_err(|e| RepositoryError::storage("list users", e.to_string()))?;
            let mut users = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| RepositoryError::storage("list users", e.to_string()))?;
                users.push(decode_user(raw)?);
            }
            Ok(users)
        })
        .await
        .map_err(|e| RepositoryError::storage("list users", e.to_string()))?
    }

    async fn set_user_role(&self, id: UserId, role: Role) -> Result<User, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let affected = conn
                .execute(
                    "UPDATE users SET role = ?2 WHERE id = ?1",
                    params![id.0, role.as_str()],
                )
                .map_err(|e| RepositoryError::storage("set user role", e.to_string()))?;
            if affected == 0 {
                return Err(RepositoryError::NotFound);
            }
            let raw = conn
                .query_row(
                    "SELECT id, email, name, role FROM users WHERE id = ?1",
                    params![id.0],
                    user_from_row,
                )
                .map_err(|e| RepositoryError::storage("set user role", e.to_string()))?;
            decode_user(raw)
        })
        .await
        .map_err(|e| RepositoryError::storage("set user role", e.to_string()))?
    }

    async fn insert_audit_entry(
        &self,
        new: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, RepositoryError> {
        let conn = self.conn.clone();
        let metadata_json = new
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::storage("serialize audit metadata", e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO audit_log (record_id, user_id, action, old_status, new_status,
                                        comment, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.record_id.0,
                    new.user_id.0,
                    new.action.as_str(),
                    new.old_status.map(|s| s.as_str()),
                    new.new_status.map(|s| s.as_str()),
                    new.comment,
                    metadata_json,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| RepositoryError::storage("insert audit entry", e.to_string()))?;
            let id = conn.last_insert_rowid();

            let actor = conn
                .query_row(
                    "SELECT id, email, name, role FROM users WHERE id = ?1",
                    params![new.user_id.0],
                    user_from_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("insert audit entry", e.to_string()))?
                .map(decode_user)
                .transpose()?
                .map(|user| AuditActor {
                    id: user.id,
                    email: user.email,
                    name: user.name,
                    role: user.role,
                });

            Ok(AuditLogEntry {
                id,
                record_id: new.record_id,
                user_id: new.user_id,
                action: new.action,
                old_status: new.old_status,
                new_status: new.new_status,
                comment: new.comment,
                metadata: new.metadata,
                created_at: now,
                actor,
            })
        })
        .await
        .map_err(|e| RepositoryError::storage("insert audit entry", e.to_string()))?
    }

    async fn list_audit_entries(
        &self,
        record_id: RecordId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let conn = self.conn.clone();
        let limit = usize_to_i64(limit, "list audit entries")?;
        let offset = usize_to_i64(offset, "list audit entries")?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!(
                    "{} ORDER BY a.id DESC LIMIT ?2 OFFSET ?3",
                    AUDIT_QUERY
                ))
                .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?;
            let rows = stmt
                .query_map(params![record_id.0, limit, offset], raw_audit_from_row)
                .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?;
            let mut entries = Vec::new();
            for row in rows {
                let raw = row
                    .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?;
                entries.push(decode_audit(raw)?);
            }
            Ok(entries)
        })
        .await
        .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?
    }

    async fn list_audit_entries_asc(
        &self,
        record_id: RecordId,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY a.id ASC", AUDIT_QUERY))
                .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?;
            let rows = stmt
                .query_map(params![record_id.0], raw_audit_from_row)
                .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?;
            let mut entries = Vec::new();
            for row in rows {
                let raw = row
                    .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?;
                entries.push(decode_audit(raw)?);
            }
            Ok(entries)
        })
        .await
        .map_err(|e| RepositoryError::storage("list audit entries", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalflow_core::record::EvaluationPayload;
    use proptest::prelude::*;

    fn new_eval(creator: i64) -> NewEvaluation {
        NewEvaluation {
            creator_id: UserId(creator),
            payload: EvaluationPayload::default(),
        }
    }

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.into(),
            name: email.split('@').next().unwrap_or(email).into(),
            role,
        }
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let now = Utc::now();
        let mut payload = EvaluationPayload::default();
        payload.comments = "initial notes".into();
        payload.metadata = serde_json::json!({"brand": "ACME", "model": "X-1"});
        let created = repo
            .create_record(
                NewEvaluation {
                    creator_id: UserId(1),
                    payload,
                },
                2026,
                now,
            )
            .await
            .unwrap();

        let fetched = repo.get_record(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.ite_number, "ITE-2026-001");
        assert_eq!(fetched.status, WorkflowStatus::Draft);
        assert_eq!(fetched.payload.comments, "initial notes");
        assert_eq!(fetched.creator_id, UserId(1));
        assert_eq!(fetched.reviewer_id, None);
    }

    #[tokio::test]
    async fn test_running_numbers_restart_per_year() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let now = Utc::now();
        let a = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        let b = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        let c = repo.create_record(new_eval(1), 2027, now).await.unwrap();
        assert_eq!(a.running_number, 1);
        assert_eq!(b.running_number, 2);
        assert_eq!(c.running_number, 1);
        assert_eq!(c.ite_number, "ITE-2027-001");
    }

    #[tokio::test]
    async fn test_conditional_update_detects_status_conflict() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let now = Utc::now();
        let record = repo.create_record(new_eval(1), 2026, now).await.unwrap();

        let patch = RecordPatch {
            status: Some(WorkflowStatus::PendingReview),
            submitted_at: Some(Some(now)),
            ..Default::default()
        };
        repo.update_record(record.id, &patch, Some(WorkflowStatus::Draft), now)
            .await
            .unwrap();

        let err = repo
            .update_record(record.id, &patch, Some(WorkflowStatus::Draft), now)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RepositoryError::StatusConflict {
                actual: WorkflowStatus::PendingReview
            }
        );
    }

    #[tokio::test]
    async fn test_update_clears_nullable_fields() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let now = Utc::now();
        let record = repo.create_record(new_eval(1), 2026, now).await.unwrap();

        let set = RecordPatch {
            status: Some(WorkflowStatus::Rejected),
            rejected_at: Some(Some(now)),
            rejection_reason: Some(Some("incomplete data".into())),
            ..Default::default()
        };
        repo.update_record(record.id, &set, None, now).await.unwrap();

        let clear = RecordPatch {
            status: Some(WorkflowStatus::PendingReview),
            rejected_at: Some(None),
            rejection_reason: Some(None),
            ..Default::default()
        };
        let updated = repo.update_record(record.id, &clear, None, now).await.unwrap();
        assert_eq!(updated.rejection_reason, None);
        assert_eq!(updated.rejected_at, None);

        let fetched = repo.get_record(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.rejection_reason, None);
        assert_eq!(fetched.rejected_at, None);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        repo.create_user(new_user("a@example.com", Role::Creator))
            .await
            .unwrap();
        assert!(repo
            .create_user(new_user("a@example.com", Role::Viewer))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_audit_entries_resolve_actor_and_survive_deletion() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let now = Utc::now();
        let user = repo
            .create_user(new_user("creator@example.com", Role::Creator))
            .await
            .unwrap();
        let record = repo.create_record(new_eval(user.id.0), 2026, now).await.unwrap();

        repo.insert_audit_entry(
            NewAuditEntry {
                record_id: record.id,
                user_id: user.id,
                action: AuditAction::Create,
                old_status: None,
                new_status: None,
                comment: None,
                metadata: None,
            },
            now,
        )
        .await
        .unwrap();

        repo.delete_record(record.id).await.unwrap();

        let entries = repo.list_audit_entries(record.id, 50, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        let actor = entries[0].actor.as_ref().unwrap();
        assert_eq!(actor.email, "creator@example.com");
        assert_eq!(actor.role, Role::Creator);
    }

    #[tokio::test]
    async fn test_audit_ordering_and_pagination() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let now = Utc::now();
        let record = repo.create_record(new_eval(1), 2026, now).await.unwrap();
        for i in 0..5 {
            repo.insert_audit_entry(
                NewAuditEntry {
                    record_id: record.id,
                    user_id: UserId(1),
                    action: AuditAction::Update,
                    old_status: None,
                    new_status: None,
                    comment: Some(format!("edit {}", i)),
                    metadata: None,
                },
                now,
            )
            .await
            .unwrap();
        }
        let page = repo.list_audit_entries(record.id, 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].comment.as_deref(), Some("edit 3"));
        assert_eq!(page[1].comment.as_deref(), Some("edit 2"));

        let asc = repo.list_audit_entries_asc(record.id).await.unwrap();
        assert_eq!(asc.first().unwrap().comment.as_deref(), Some("edit 0"));
        assert_eq!(asc.last().unwrap().comment.as_deref(), Some("edit 4"));
    }

    proptest! {
        #[test]
        fn payload_and_reason_round_trip(
            comments in "\\PC{0,100}",
            reason in "\\PC{1,100}",
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let repo = SqliteRepository::new_in_memory().unwrap();
                let now = Utc::now();
                let mut payload = EvaluationPayload::default();
                payload.comments = comments.clone();
                let record = repo
                    .create_record(
                        NewEvaluation {
                            creator_id: UserId(1),
                            payload,
                        },
                        2026,
                        now,
                    )
                    .await
                    .unwrap();

                let patch = RecordPatch {
                    status: Some(WorkflowStatus::Rejected),
                    rejection_reason: Some(Some(reason.clone())),
                    ..Default::default()
                };
                repo.update_record(record.id, &patch, None, now).await.unwrap();

                let fetched = repo.get_record(record.id).await.unwrap().unwrap();
                assert_eq!(fetched.payload.comments, comments);
                assert_eq!(fetched.rejection_reason, Some(reason));
            });
        }
    }
}
