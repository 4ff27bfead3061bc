//! Schema validation against the live database.
//!
//! A checked block is probed with `EXPLAIN`, then its declared `@return`
//! fields are matched against the statement's projected columns. The
//! resulting [`ColumnMap`] lets the emitter read columns by index.

use tracing::debug;

use crate::engine::Database;
use crate::error::{SqlGenError, SqlGenResult};
use crate::parser::{ParsedQuery, ReturnField};
use crate::sql::{StatementKind, projected_columns};

/// Projected column names of a statement, by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: Vec<String>,
}

impl ColumnMap {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Zero-based index of the first column called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Probe `query` against the schema and check the declared fields.
///
/// Returns `None` when the statement's columns cannot be known statically
/// (no projection, or a `*` wildcard); the emitter then reads by name.
pub fn validate(
    db: &mut dyn Database,
    function: &str,
    query: &ParsedQuery,
    kind: StatementKind,
    fields: &[ReturnField],
) -> SqlGenResult<Option<ColumnMap>> {
    db.explain(&query.sql)?;

    let Some(columns) = projected_columns(&query.sql, kind) else {
        debug!(function, %kind, "no static column list, reading by name");
        return Ok(None);
    };

    if let Some(missing) = fields.iter().find(|f| !columns.contains(&f.name)) {
        return Err(SqlGenError::MissingField {
            field: missing.name.clone(),
            sql: query.sql.clone(),
            function: function.to_string(),
        });
    }

    debug!(function, columns = ?columns, "columns resolved");
    Ok(Some(ColumnMap::new(columns)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DbParams, SqliteDatabase};
    use crate::parser::rewrite_placeholders;

    fn users_db() -> SqliteDatabase {
        let mut db = SqliteDatabase::open(":memory:", &[], DbParams::default()).unwrap();
        db.write("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, password TEXT)")
            .unwrap();
        db
    }

    fn check(db: &mut SqliteDatabase, sql: &str, fields: &[ReturnField]) -> SqlGenResult<Option<ColumnMap>> {
        let query = rewrite_placeholders(sql);
        let kind = StatementKind::classify(&query.sql);
        validate(db, "Users::test", &query, kind, fields)
    }

    #[test]
    fn test_columns_with_alias_and_qualifier() {
        let mut db = users_db();
        let map = check(
            &mut db,
            "SELECT u.id, name AS full_name FROM users u WHERE id=:id(int64)",
            &[ReturnField::new("int64", "id"), ReturnField::new("string", "full_name")],
        )
        .unwrap()
        .unwrap();
        assert_eq!(map.columns(), &["id".to_string(), "full_name".to_string()]);
        assert_eq!(map.index_of("full_name"), Some(1));
        assert_eq!(map.index_of("name"), None);
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut db = users_db();
        let err = check(
            &mut db,
            "SELECT id FROM users",
            &[ReturnField::new("int64", "id"), ReturnField::new("string", "name")],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot find variable 'name' in SQL: SELECT id FROM users Function: Users::test"
        );
    }

    #[test]
    fn test_prepare_failure() {
        let mut db = users_db();
        let err = check(&mut db, "SELECT id FROM nowhere", &[]).unwrap_err();
        assert!(matches!(err, SqlGenError::Prepare { .. }));
    }

    #[test]
    fn test_returning_clause() {
        let mut db = users_db();
        let map = check(
            &mut db,
            "INSERT INTO users (name, password) VALUES (:name(string), :password(string)) RETURNING id",
            &[ReturnField::new("int64_raw", "id")],
        )
        .unwrap()
        .unwrap();
        assert_eq!(map.index_of("id"), Some(0));
    }

    #[test]
    fn test_wildcard_and_plain_dml_have_no_map() {
        let mut db = users_db();
        assert_eq!(check(&mut db, "SELECT * FROM users", &[ReturnField::new("int64", "id")]).unwrap(), None);
        assert_eq!(check(&mut db, "DELETE FROM users WHERE id=:id(int64)", &[]).unwrap(), None);
    }
}
