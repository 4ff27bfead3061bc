//! The generation pipeline.
//!
//! ```text
//! source ─ tokenize ─ annotate ─┬─ -SQLGenTempSetup  → db.write(sql)
//!                               ├─ -SQLGenConfig     → GenConfig
//!                               └─ -SQLGenAccess[NoCheck], per block:
//!                                    parse → rewrite → classify → shape
//!                                    → validate (checked) → emit
//! segments ─ render_source → new source
//! GeneratedData ─ splice_header → new header
//! ```
//!
//! A failing block keeps its original text and contributes nothing to the
//! header; the run continues with the next block. A block without a stub
//! gets its function inserted directly after the annotation comment.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::annotation::{AnnotatedBlock, Directive, Segment, annotate};
use crate::config::{CodegenDefaults, GenConfig};
use crate::emitter::{FunctionSpec, GeneratedData, emit_function};
use crate::engine::Database;
use crate::error::{SqlGenError, SqlGenResult};
use crate::lexer::tokenize;
use crate::parser::{parse_return_fields, parse_signature, rewrite_placeholders};
use crate::shape::infer_shape;
use crate::splice::{render_source, splice_header};
use crate::sql::{StatementKind, projection_text};
use crate::validate::validate;

/// A block that could not be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFailure {
    pub function: String,
    pub message: String,
}

/// Outcome of one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Qualified names of generated functions, in file order.
    pub generated: Vec<String>,
    /// Number of `-SQLGenAccess`/`-SQLGenAccessNoCheck` blocks seen.
    pub attempted: usize,
    pub failures: Vec<BlockFailure>,
    /// Problems that left a whole file unchanged.
    pub file_errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Report {
    /// Whether the run counts as successful.
    ///
    /// File-level errors always fail. Block failures fail the run only when
    /// `strict`, or when every attempted block failed.
    pub fn is_success(&self, strict: bool) -> bool {
        if !self.file_errors.is_empty() {
            return false;
        }
        if strict {
            return self.failures.is_empty();
        }
        self.attempted == 0 || !self.generated.is_empty()
    }
}

/// Regenerated files plus the report.
#[derive(Debug, Clone)]
pub struct Output {
    pub source: String,
    pub header: String,
    pub report: Report,
}

/// Runs the pipeline against a database.
pub struct Generator<'a> {
    db: &'a mut dyn Database,
    defaults: CodegenDefaults,
}

impl<'a> Generator<'a> {
    pub fn new(db: &'a mut dyn Database) -> Self {
        Self {
            db,
            defaults: CodegenDefaults::default(),
        }
    }

    /// Collaborator type names used when the file does not set them.
    pub fn with_defaults(mut self, defaults: CodegenDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Regenerate `source` and its declarations file `header`.
    pub fn generate(&mut self, source: &str, header: &str) -> Output {
        let tokens = tokenize(source);
        let mut segments = annotate(&tokens);
        let mut report = Report::default();

        debug!(
            tokens = tokens.len(),
            blocks = segments.iter().filter(|s| matches!(s, Segment::Annotated(_))).count(),
            "source annotated"
        );

        self.run_setup(&segments, &mut report);
        let config = self.resolve_config(source, &segments, &mut report);

        let mut data = GeneratedData::new();
        for segment in &mut segments {
            let Segment::Annotated(block) = segment else {
                continue;
            };
            let checked = match block.annotations.directive() {
                Some(Directive::Access) => true,
                Some(Directive::AccessNoCheck) => false,
                _ => continue,
            };

            report.attempted += 1;
            let function = block.annotations.get("func").unwrap_or("<unnamed>").to_string();
            match self.generate_block(block, checked, &config, &mut data, &mut report) {
                Ok((name, code)) => {
                    info!(function = %name, checked, "generated");
                    block.code = code;
                    report.generated.push(name);
                }
                Err(e) => {
                    warn!(function = %function, error = %e, "block left unchanged");
                    report.failures.push(BlockFailure {
                        function,
                        message: e.to_string(),
                    });
                }
            }
        }

        let new_source = render_source(&segments);
        let new_header = match splice_header(header, &data, &config) {
            Ok(spliced) => spliced,
            Err(e) => {
                warn!(error = %e, "header left unchanged");
                report.file_errors.push(e.to_string());
                header.to_string()
            }
        };

        Output {
            source: new_source,
            header: new_header,
            report,
        }
    }

    /// Execute every `-SQLGenTempSetup` block before anything is validated.
    fn run_setup(&mut self, segments: &[Segment], report: &mut Report) {
        for block in annotated(segments, Directive::TempSetup) {
            let result = match block.annotations.get("sql").filter(|sql| !sql.is_empty()) {
                Some(sql) => self.db.write(sql),
                None => Err(SqlGenError::annotation(Directive::TEMP_SETUP, "@sql is missing")),
            };
            match result {
                Ok(()) => debug!("temporary setup executed"),
                Err(e) => {
                    warn!(error = %e, "temporary setup failed");
                    report.failures.push(BlockFailure {
                        function: Directive::TEMP_SETUP.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Sniff the unmodified source, then apply `-SQLGenConfig` blocks in
    /// file order.
    fn resolve_config(&self, source: &str, segments: &[Segment], report: &mut Report) -> GenConfig {
        let mut config = GenConfig::sniff(source, &self.defaults);
        for block in annotated(segments, Directive::Config) {
            for warning in config.apply(&block.annotations) {
                warn!(%warning, "config option ignored");
                report.warnings.push(warning);
            }
        }
        config
    }

    fn generate_block(
        &mut self,
        block: &AnnotatedBlock,
        checked: bool,
        config: &GenConfig,
        data: &mut GeneratedData,
        report: &mut Report,
    ) -> SqlGenResult<(String, String)> {
        let ann = &block.annotations;
        let func = ann
            .get("func")
            .ok_or_else(|| SqlGenError::annotation("<unnamed>", "@func is missing"))?;
        let signature = parse_signature(func)?;
        let function = signature.qualified_name();

        // An empty block is filled in place; an opened but unclosed stub
        // would be duplicated.
        if block.unclosed {
            return Err(SqlGenError::annotation(
                &function,
                "function body following the annotation is not closed before the next comment",
            ));
        }

        let fields = parse_return_fields(ann.get("return").unwrap_or_default())?;
        let sql = ann
            .get("sql")
            .filter(|sql| !sql.is_empty())
            .ok_or_else(|| SqlGenError::annotation(&function, "@sql is missing"))?;

        let query = rewrite_placeholders(sql);
        let kind = StatementKind::classify(&query.sql);
        let shape = infer_shape(&signature, &fields)?;
        debug!(function = %function, %kind, sql = %query.sql, "query rewritten");

        if shape.reads_rows() && !returns_rows(&query.sql, kind) {
            let warning = format!("{}: {} statement does not return rows", function, kind);
            warn!(%warning);
            report.warnings.push(warning);
        }

        let columns = if checked {
            validate(self.db, &function, &query, kind, &fields)?
        } else {
            None
        };

        let spec = FunctionSpec {
            signature: &signature,
            fields: &fields,
            query: &query,
            shape: &shape,
            columns: columns.as_ref(),
        };
        let code = emit_function(&spec, config, data)?;
        Ok((function, code))
    }
}

fn annotated(segments: &[Segment], directive: Directive) -> impl Iterator<Item = &AnnotatedBlock> {
    segments.iter().filter_map(move |segment| match segment {
        Segment::Annotated(block) if block.annotations.directive() == Some(directive) => Some(block),
        _ => None,
    })
}

fn returns_rows(sql: &str, kind: StatementKind) -> bool {
    match kind {
        StatementKind::Select | StatementKind::None => true,
        k if k.is_dml() => projection_text(sql, k).is_some(),
        _ => false,
    }
}
