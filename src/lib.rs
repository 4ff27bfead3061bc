//! # sqlgen: SQL data-access code from annotated comments
//!
//! sqlgen scans a C++ source file for annotated comments, checks the
//! embedded SQL against a live SQLite schema and writes a complete
//! data-access function after each comment, replacing the stub there if
//! one exists. Record types,
//! declarations and cached statement members go into the paired header
//! between marker comments.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sqlgen::prelude::*;
//!
//! let mut db = SqliteDatabase::open("app.db", &[], DbParams::default())?;
//! let output = sqlgen::generate(&mut db, &source, &header);
//! for failure in &output.report.failures {
//!     eprintln!("{}: {}", failure.function, failure.message);
//! }
//! ```
//!
//! ## Annotations
//!
//! | Key                    | Meaning                                   |
//! |------------------------|-------------------------------------------|
//! | `@-SQLGenAccess`       | Generate, validated against the schema    |
//! | `@-SQLGenAccessNoCheck`| Generate without validation               |
//! | `@-SQLGenTempSetup`    | Run `@sql` before generating              |
//! | `@-SQLGenConfig`       | `tab`, `newline`, `query_type`, `cursor_type` |
//! | `@func`                | `<returnType> [Class::]method`            |
//! | `@return`              | `<type> <name>[, ...]`                    |
//! | `@sql`                 | Statement with `:name(type)` placeholders |

pub mod annotation;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod generator;
pub mod lexer;
pub mod parser;
pub mod shape;
pub mod splice;
pub mod sql;
pub mod validate;

pub mod prelude {
    pub use crate::config::{CodegenDefaults, GenConfig, ToolConfig};
    pub use crate::engine::{Database, DbParams, DbRow, SqliteDatabase};
    pub use crate::error::*;
    pub use crate::generator::{BlockFailure, Generator, Output, Report};
    pub use crate::shape::Shape;
    pub use crate::sql::StatementKind;
}

/// Regenerate `source` and its declarations file `header` with default
/// collaborator type names.
pub fn generate(db: &mut dyn engine::Database, source: &str, header: &str) -> generator::Output {
    generator::Generator::new(db).generate(source, header)
}
