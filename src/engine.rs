//! Database collaborator for sqlgen.
//!
//! The generator only needs a narrow slice of a database: run setup SQL,
//! read rows and probe statements with `EXPLAIN`. [`Database`] is that
//! seam; [`SqliteDatabase`] implements it on top of sqlx, driving the async
//! driver from a private current-thread runtime so that callers stay
//! synchronous.

use std::ops::Index;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, SqliteConnection, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::error::{SqlGenError, SqlGenResult};

/// One result row: column name to text value, in result column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbRow {
    columns: Vec<(String, String)>,
}

impl DbRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Index<&str> for DbRow {
    type Output = String;

    fn index(&self, name: &str) -> &String {
        match self.columns.iter().find(|(column, _)| column == name) {
            Some((_, value)) => value,
            None => panic!("no column named '{}' in row", name),
        }
    }
}

/// Operations the generator needs from a database.
pub trait Database {
    /// Execute one or more statements, discarding any rows.
    fn write(&mut self, sql: &str) -> SqlGenResult<()>;

    /// Execute a statement and collect its rows as text.
    fn read(&mut self, sql: &str) -> SqlGenResult<Vec<DbRow>>;

    /// Prepare and run `EXPLAIN <sql>`. Fails when `sql` does not compile
    /// against the current schema.
    fn explain(&mut self, sql: &str) -> SqlGenResult<()> {
        self.read(&format!("EXPLAIN {}", sql)).map(|_| ())
    }
}

/// Connection parameters, the `[database]` table of `sqlgen.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbParams {
    pub synchronous: String,
    pub foreign_keys: bool,
    pub page_size: u32,
    /// `PRAGMA mmap_size`, not set when 0.
    pub mmap_size: u64,
    pub cache_size_kib: u32,
    pub busy_timeout_ms: u32,
    /// Attempts for a statement hitting busy/locked before giving up.
    pub max_retries: u32,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            synchronous: "NORMAL".to_string(),
            foreign_keys: true,
            page_size: 4096,
            mmap_size: 0,
            cache_size_kib: 2 * 1024,
            busy_timeout_ms: 10_000,
            max_retries: 5,
        }
    }
}

/// Upper bound for the escalated busy timeout.
const MAX_BUSY_TIMEOUT_MS: u64 = 120_000;

/// A SQLite connection with pragmas applied and databases attached.
pub struct SqliteDatabase {
    // Declared first so it is dropped before the runtime.
    conn: SqliteConnection,
    runtime: tokio::runtime::Runtime,
    params: DbParams,
    attached: Vec<(String, String)>,
}

impl SqliteDatabase {
    /// Open `path` (`:memory:` for a private in-memory database) and attach
    /// every `(name, path)` pair.
    pub fn open(path: &str, attachments: &[(String, String)], params: DbParams) -> SqlGenResult<Self> {
        let open_err = |message: String| SqlGenError::Open {
            path: path.to_string(),
            message,
        };

        if !params.synchronous.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(open_err(format!(
                "invalid synchronous setting '{}'",
                params.synchronous
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| open_err(e.to_string()))?;

        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| open_err(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(path).create_if_missing(true)
        };
        let options = options.busy_timeout(Duration::from_millis(u64::from(params.busy_timeout_ms)));

        let conn = runtime
            .block_on(SqliteConnection::connect_with(&options))
            .map_err(|e| open_err(e.to_string()))?;

        let mut db = Self {
            conn,
            runtime,
            params,
            attached: Vec::new(),
        };
        db.apply_pragmas().map_err(|e| open_err(e.to_string()))?;
        for (name, file) in attachments {
            db.attach(name, file).map_err(|e| open_err(e.to_string()))?;
        }

        debug!(path, attached = attachments.len(), "database opened");
        Ok(db)
    }

    fn apply_pragmas(&mut self) -> SqlGenResult<()> {
        let p = self.params.clone();
        self.write(&format!("PRAGMA synchronous={}", p.synchronous))?;
        self.write(&format!(
            "PRAGMA foreign_keys = {}",
            if p.foreign_keys { "ON" } else { "OFF" }
        ))?;
        self.write(&format!("PRAGMA page_size={}", p.page_size))?;
        if p.mmap_size > 0 {
            self.write(&format!("PRAGMA mmap_size={}", p.mmap_size))?;
        }
        self.write(&format!("PRAGMA cache_size = -{}", p.cache_size_kib))?;
        self.set_busy_timeout(u64::from(p.busy_timeout_ms))
    }

    /// Attach a secondary database under `name`.
    pub fn attach(&mut self, name: &str, path: &str) -> SqlGenResult<()> {
        self.write(&format!(
            "ATTACH DATABASE '{}' AS \"{}\"",
            path.replace('\'', "''"),
            name.replace('"', "\"\"")
        ))?;
        self.attached.push((name.to_string(), path.to_string()));
        Ok(())
    }

    /// Detach every attached database.
    pub fn detach_all(&mut self) -> SqlGenResult<()> {
        for (name, _) in std::mem::take(&mut self.attached) {
            self.write(&format!("DETACH DATABASE \"{}\"", name.replace('"', "\"\"")))?;
        }
        Ok(())
    }

    /// Names and paths of attached databases.
    pub fn attached(&self) -> &[(String, String)] {
        &self.attached
    }

    /// Close the connection cleanly.
    pub fn close(self) -> SqlGenResult<()> {
        let Self { conn, runtime, .. } = self;
        runtime.block_on(conn.close()).map_err(|e| SqlGenError::Execution {
            sql: String::new(),
            message: e.to_string(),
            attempts: 1,
        })
    }

    fn set_busy_timeout(&mut self, ms: u64) -> SqlGenResult<()> {
        let sql = format!("PRAGMA busy_timeout = {}", ms);
        self.runtime
            .block_on(self.conn.execute(sql.as_str()))
            .map(|_| ())
            .map_err(|e| SqlGenError::prepare(sql, e.to_string()))
    }

    /// Run a statement, retrying busy/locked/protocol conditions with an
    /// escalating busy timeout.
    fn run(&mut self, sql: &str, fetch: bool) -> SqlGenResult<Vec<DbRow>> {
        let max_attempts = self.params.max_retries.max(1);
        let base_timeout = u64::from(self.params.busy_timeout_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = if fetch {
                self.runtime
                    .block_on(sqlx::query(sql).fetch_all(&mut self.conn))
                    .map(|rows| rows.iter().map(row_to_map).collect())
            } else {
                self.runtime
                    .block_on(self.conn.execute(sql))
                    .map(|_| Vec::new())
            };

            match result {
                Ok(rows) => {
                    if attempt > 1 {
                        self.set_busy_timeout(base_timeout)?;
                    }
                    return Ok(rows);
                }
                Err(e) if is_transient(&e) && attempt < max_attempts => {
                    let timeout = (base_timeout.max(50) << attempt.min(8)).min(MAX_BUSY_TIMEOUT_MS);
                    warn!(attempt, timeout_ms = timeout, error = %e, sql, "database busy, retrying");
                    if let Err(e) = self.set_busy_timeout(timeout) {
                        warn!(error = %e, "could not raise busy timeout");
                    }
                }
                Err(e) if is_transient(&e) => {
                    return Err(SqlGenError::Execution {
                        sql: sql.to_string(),
                        message: e.to_string(),
                        attempts: attempt,
                    });
                }
                Err(sqlx::Error::Database(e)) if is_prepare_failure(e.code().as_deref()) => {
                    return Err(SqlGenError::prepare(sql, e.message()));
                }
                Err(e) => {
                    return Err(SqlGenError::Execution {
                        sql: sql.to_string(),
                        message: e.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

impl Database for SqliteDatabase {
    fn write(&mut self, sql: &str) -> SqlGenResult<()> {
        self.run(sql, false).map(|_| ())
    }

    fn read(&mut self, sql: &str) -> SqlGenResult<Vec<DbRow>> {
        self.run(sql, true)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_PROTOCOL, including their
/// extended codes.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6 | 15)),
        _ => false,
    }
}

/// SQLITE_ERROR is what the compiler reports for unknown tables, columns
/// and syntax errors. Everything else (constraints, I/O, read-only files)
/// happens while the statement runs.
fn is_prepare_failure(code: Option<&str>) -> bool {
    code.and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| code & 0xff == 1)
}

/// Convert a row to an ordered name → text row.
fn row_to_map(row: &SqliteRow) -> DbRow {
    let mut map = DbRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => String::new(),
            Ok(raw) => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(i)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                "REAL" => row
                    .try_get::<f64, _>(i)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                "BLOB" => row
                    .try_get::<Vec<u8>, _>(i)
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default(),
                _ => row.try_get::<String, _>(i).unwrap_or_default(),
            },
            Err(_) => String::new(),
        };
        map.push(column.name(), value);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> SqliteDatabase {
        SqliteDatabase::open(":memory:", &[], DbParams::default()).unwrap()
    }

    #[test]
    fn test_write_and_read() {
        let mut db = memory();
        db.write("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO t (name) VALUES ('a'), (NULL)")
            .unwrap();
        let rows = db.read("SELECT id, name FROM t ORDER BY id").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "1");
        assert_eq!(rows[0]["name"], "a");
        assert_eq!(rows[1]["name"], "");
    }

    #[test]
    fn test_explain_reports_prepare_error() {
        let mut db = memory();
        db.write("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(db.explain("SELECT id FROM t WHERE id=?").is_ok());

        let err = db.explain("SELECT nope FROM t").unwrap_err();
        match err {
            SqlGenError::Prepare { sql, message } => {
                assert_eq!(sql, "EXPLAIN SELECT nope FROM t");
                assert!(message.contains("nope"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rows_keep_column_order() {
        let mut db = memory();
        let rows = db.read("SELECT 3 AS z, 'b' AS a, NULL AS m").unwrap();
        let names: Vec<&str> = rows[0].iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
        assert_eq!(rows[0].get("a"), Some("b"));
        assert_eq!(rows[0].get("missing"), None);
    }

    #[test]
    fn test_constraint_failure_is_execution_error() {
        let mut db = memory();
        db.write("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1)")
            .unwrap();

        let err = db.write("INSERT INTO t VALUES (1)").unwrap_err();
        match err {
            SqlGenError::Execution { sql, attempts, .. } => {
                assert_eq!(sql, "INSERT INTO t VALUES (1)");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(matches!(db.write("INSERT INTO nowhere VALUES (1)"), Err(SqlGenError::Prepare { .. })));
    }

    #[test]
    fn test_error_code_classification() {
        assert!(is_prepare_failure(Some("1")));
        assert!(!is_prepare_failure(Some("19")));
        assert!(!is_prepare_failure(Some("2067")));
        assert!(!is_prepare_failure(None));
    }

    #[test]
    fn test_pragmas_applied() {
        let params = DbParams {
            cache_size_kib: 1234,
            ..DbParams::default()
        };
        let mut db = SqliteDatabase::open(":memory:", &[], params).unwrap();
        let rows = db.read("PRAGMA cache_size").unwrap();
        assert_eq!(rows[0]["cache_size"], "-1234");
    }

    #[test]
    fn test_attach_and_detach() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other.db");
        let other = other.to_string_lossy().to_string();

        let mut db = SqliteDatabase::open(":memory:", &[("aux".to_string(), other.clone())], DbParams::default())
            .unwrap();
        db.write("CREATE TABLE aux.items (id INTEGER)").unwrap();
        assert!(db.explain("SELECT id FROM aux.items").is_ok());
        assert_eq!(db.attached(), &[("aux".to_string(), other)]);

        db.detach_all().unwrap();
        assert!(db.attached().is_empty());
        assert!(db.explain("SELECT id FROM aux.items").is_err());
    }

    #[test]
    fn test_invalid_synchronous_rejected() {
        let params = DbParams {
            synchronous: "OFF; DROP".to_string(),
            ..DbParams::default()
        };
        assert!(matches!(
            SqliteDatabase::open(":memory:", &[], params),
            Err(SqlGenError::Open { .. })
        ));
    }
}
