//! Reassembly of the source file and injection into the header.

use crate::annotation::Segment;
use crate::config::GenConfig;
use crate::emitter::GeneratedData;
use crate::error::{SqlGenError, SqlGenResult};

pub const FUNCTIONS_BEGIN: &str = "//@-SQLGenFunctionsBegin";
pub const FUNCTIONS_END: &str = "//@-SQLGenFunctionsEnd";
pub const VARIABLES_BEGIN: &str = "//@-SQLGenVariablesBegin";
pub const VARIABLES_END: &str = "//@-SQLGenVariablesEnd";

/// Concatenate the segments' current text.
pub fn render_source(segments: &[Segment]) -> String {
    segments.iter().map(Segment::text).collect()
}

/// Replace both marker regions of `header` with the generated declarations.
///
/// Markers are kept. Nothing is changed unless both regions are found.
pub fn splice_header(header: &str, data: &GeneratedData, config: &GenConfig) -> SqlGenResult<String> {
    let (i, n) = (&config.indent, &config.newline);

    let records = data.render_records(config);
    let mut functions = String::new();
    functions.push_str(&records);
    if !records.is_empty() {
        functions.push_str(n);
        functions.push_str(n);
    }
    functions.push_str(&data.function_decls);
    functions.push_str(i);

    let mut members = data.members.clone();
    members.push_str(i);

    let header = replace_region(header, FUNCTIONS_BEGIN, FUNCTIONS_END, &format!("{n}{functions}"))?;
    replace_region(&header, VARIABLES_BEGIN, VARIABLES_END, &format!("{n}{members}"))
}

fn replace_region(text: &str, begin: &'static str, end: &'static str, content: &str) -> SqlGenResult<String> {
    let start = text.find(begin).ok_or(SqlGenError::markers(begin, end))? + begin.len();
    let stop = text[start..]
        .find(end)
        .map(|pos| start + pos)
        .ok_or(SqlGenError::markers(begin, end))?;

    let mut out = String::with_capacity(text.len() + content.len());
    out.push_str(&text[..start]);
    out.push_str(content);
    out.push_str(&text[stop..]);
    Ok(out)
}
