//! Output formatting and tool configuration.
//!
//! [`GenConfig`] controls how generated code is laid out. Each option comes
//! from a `-SQLGenConfig` block when present, otherwise from the
//! conventions already used in the source file:
//!
//! ```text
//! /**
//! * @-SQLGenConfig
//! * @tab spaces:4
//! * @newline unix
//! * @query_type db::Query
//! * @cursor_type db::Cursor
//! */
//! ```
//!
//! [`ToolConfig`] is the `sqlgen.toml` file: database pragmas and the
//! default collaborator type names.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::annotation::{Annotations, Directive};
use crate::engine::DbParams;
use crate::error::{SqlGenError, SqlGenResult};

pub const DEFAULT_QUERY_TYPE: &str = "sqlgen::DatabaseQuery";
pub const DEFAULT_CURSOR_TYPE: &str = "sqlgen::DatabaseCursor";

const CONFIG_FILE: &str = "sqlgen.toml";

/// Formatting of generated code, fixed before the first function is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenConfig {
    pub indent: String,
    pub newline: String,
    pub query_type: String,
    pub cursor_type: String,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            indent: "\t".to_string(),
            newline: "\r\n".to_string(),
            query_type: DEFAULT_QUERY_TYPE.to_string(),
            cursor_type: DEFAULT_CURSOR_TYPE.to_string(),
        }
    }
}

impl GenConfig {
    /// Derive formatting from the unmodified source file.
    ///
    /// One tab unless the file has no tab at all (then four spaces);
    /// `\r\n` unless the file has no `\r\n` at all (then `\n`).
    pub fn sniff(source: &str, defaults: &CodegenDefaults) -> Self {
        let indent = if source.contains('\t') { "\t" } else { "    " };
        let newline = if source.contains("\r\n") { "\r\n" } else { "\n" };
        Self {
            indent: indent.to_string(),
            newline: newline.to_string(),
            query_type: defaults.query_type.clone(),
            cursor_type: defaults.cursor_type.clone(),
        }
    }

    /// Apply the options of a `-SQLGenConfig` block.
    ///
    /// Returns a warning for every option that could not be applied.
    pub fn apply(&mut self, annotations: &Annotations) -> Vec<String> {
        let mut warnings = Vec::new();

        // `@-SQLGenConfig tab: spaces:4, newline: unix` carries options inline.
        let inline = annotations
            .get(Directive::CONFIG)
            .unwrap_or_default()
            .split(',')
            .filter_map(|option| option.split_once(':'))
            .map(|(k, v)| (k.trim(), v.trim()));
        let options = annotations
            .iter()
            .filter(|(k, _)| !k.starts_with('-'))
            .chain(inline);

        for (key, value) in options {
            let key = key.trim_end_matches(':');
            match key {
                "tab" => match parse_tab(value) {
                    Some(indent) => self.indent = indent,
                    None => warnings.push(format!("unsupported tab setting '{}'", value)),
                },
                "newline" => match value.to_ascii_lowercase().as_str() {
                    "unix" | "lf" => self.newline = "\n".to_string(),
                    "windows" | "dos" | "crlf" => self.newline = "\r\n".to_string(),
                    _ => warnings.push(format!("unsupported newline setting '{}'", value)),
                },
                "query_type" | "cursor_type" if value.is_empty() => {
                    warnings.push(format!("{} needs a type name", key));
                }
                "query_type" => self.query_type = value.to_string(),
                "cursor_type" => self.cursor_type = value.to_string(),
                _ => warnings.push(format!("unknown config option '{}'", key)),
            }
        }

        debug!(indent = ?self.indent, newline = ?self.newline, "applied -SQLGenConfig");
        warnings
    }
}

fn parse_tab(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_lowercase();
    if value == "tab" || value == "tabs" {
        return Some("\t".to_string());
    }
    let count: usize = value.strip_prefix("spaces:")?.trim().parse().ok()?;
    Some(" ".repeat(count))
}

/// Default collaborator type names, overridable per file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodegenDefaults {
    pub query_type: String,
    pub cursor_type: String,
}

impl Default for CodegenDefaults {
    fn default() -> Self {
        Self {
            query_type: DEFAULT_QUERY_TYPE.to_string(),
            cursor_type: DEFAULT_CURSOR_TYPE.to_string(),
        }
    }
}

/// Contents of `sqlgen.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub database: DbParams,
    pub codegen: CodegenDefaults,
}

impl ToolConfig {
    /// Load from an explicit path, else `./sqlgen.toml`, else the user
    /// config directory, else defaults.
    pub fn load(explicit: Option<&Path>) -> SqlGenResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("sqlgen").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> SqlGenResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SqlGenError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)
            .map_err(|e| SqlGenError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "loaded tool config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
