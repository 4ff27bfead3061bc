//! Error types for sqlgen.

use thiserror::Error;

/// The main error type for sqlgen operations.
#[derive(Debug, Error)]
pub enum SqlGenError {
    /// The database could not be opened or an attachment failed.
    #[error("Could not open database \"{path}\": {message}")]
    Open { path: String, message: String },

    /// A statement failed to prepare.
    #[error("Error preparing statement [{sql}]: {message}")]
    Prepare { sql: String, message: String },

    /// A statement failed while running, or kept failing after retries.
    #[error("Error executing [{sql}] after {attempts} attempt(s): {message}")]
    Execution {
        sql: String,
        message: String,
        attempts: u32,
    },

    /// Malformed annotation block (`@func`, `@return`, `@sql`).
    #[error("Function {function}: {message}")]
    Annotation { function: String, message: String },

    /// A declared return field is not projected by the statement.
    #[error("Cannot find variable '{field}' in SQL: {sql} Function: {function}")]
    MissingField {
        field: String,
        sql: String,
        function: String,
    },

    /// Two uses of one record name disagree on the field list.
    #[error("Record '{name}' already declared with fields ({existing}), conflicting use declares ({requested})")]
    RecordConflict {
        name: String,
        existing: String,
        requested: String,
    },

    /// Splice markers missing from the declarations file.
    #[error("Cannot find \"{begin}\" or \"{end}\" in header file")]
    MissingMarkers {
        begin: &'static str,
        end: &'static str,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqlGenError {
    /// Create an annotation error for the given function.
    pub fn annotation(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Annotation {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a prepare error carrying the failing SQL.
    pub fn prepare(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Prepare {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Create a missing-markers error.
    pub fn markers(begin: &'static str, end: &'static str) -> Self {
        Self::MissingMarkers { begin, end }
    }
}

/// Result type alias for sqlgen operations.
pub type SqlGenResult<T> = Result<T, SqlGenError>;
