//! Lightweight SQL scanning: statement classification and projected
//! column extraction.
//!
//! This is not a SQL parser. It walks words at their parenthesis depth,
//! skipping literals, quoted identifiers and comments, which is enough to
//! find the statement keyword and the column list of a projection.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Kind of SQL statement, from its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    None,
}

impl StatementKind {
    /// Classify by the first statement keyword. A leading `WITH` clause is
    /// skipped by taking the first keyword at parenthesis depth 0 after it.
    pub fn classify(sql: &str) -> Self {
        let words = words(sql);
        let Some(first) = words.first() else {
            return StatementKind::None;
        };

        if let Some(kind) = Self::from_keyword(first.text) {
            return kind;
        }
        if first.text.eq_ignore_ascii_case("with") {
            return words[1..]
                .iter()
                .filter(|w| w.depth == first.depth)
                .find_map(|w| Self::from_keyword(w.text))
                .unwrap_or(StatementKind::None);
        }
        StatementKind::None
    }

    fn from_keyword(word: &str) -> Option<Self> {
        let kind = match word.to_ascii_lowercase().as_str() {
            "select" => StatementKind::Select,
            "insert" | "replace" => StatementKind::Insert,
            "update" => StatementKind::Update,
            "delete" => StatementKind::Delete,
            "create" => StatementKind::Create,
            "drop" => StatementKind::Drop,
            _ => return None,
        };
        Some(kind)
    }

    /// Statements that can carry a `RETURNING` clause.
    pub fn is_dml(self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Create => "create",
            StatementKind::Drop => "drop",
            StatementKind::None => "none",
        };
        f.write_str(name)
    }
}

/// A bare word outside literals and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
    /// Parenthesis depth the word appears at.
    pub depth: usize,
}

/// Scan the bare words of a SQL string.
pub fn words(sql: &str) -> Vec<Word<'_>> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut chars = sql.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\'' | '"' | '`' => skip_through(&mut chars, ch),
            '[' => skip_through(&mut chars, ']'),
            '-' if matches!(chars.peek(), Some((_, '-'))) => skip_through(&mut chars, '\n'),
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut star = false;
                for (_, c) in chars.by_ref() {
                    if star && c == '/' {
                        break;
                    }
                    star = c == '*';
                }
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c.is_alphanumeric() || c == '_' => {
                let mut end = idx + c.len_utf8();
                while let Some(&(j, n)) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '$' {
                        end = j + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !c.is_ascii_digit() {
                    out.push(Word {
                        text: &sql[idx..end],
                        start: idx,
                        end,
                        depth,
                    });
                }
            }
            _ => {}
        }
    }

    out
}

fn skip_through(chars: &mut Peekable<CharIndices<'_>>, close: char) {
    for (_, c) in chars.by_ref() {
        if c == close {
            break;
        }
    }
}

/// Byte offsets of characters matching `pred` at depth 0, outside quotes.
fn top_level_positions(text: &str, pred: impl Fn(char) -> bool) -> Vec<usize> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, ch) in text.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && pred(ch) => out.push(idx),
            _ => {}
        }
    }

    out
}

/// Split on commas that are not nested in parentheses or quotes.
pub fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for pos in top_level_positions(text, |c| c == ',') {
        parts.push(text[last..pos].trim());
        last = pos + 1;
    }
    parts.push(text[last..].trim());
    parts
}

const PROJECTION_END: &[&str] = &[
    "from", "where", "group", "having", "order", "limit", "union", "intersect", "except",
    "window",
];

/// The raw column-list text of a statement's projection: between `SELECT`
/// and `FROM` for selects, after `RETURNING` for insert/update/delete.
pub fn projection_text(sql: &str, kind: StatementKind) -> Option<&str> {
    let words = words(sql);
    let (start, depth) = match kind {
        StatementKind::Select => {
            let pos = words
                .iter()
                .position(|w| w.depth == 0 && w.text.eq_ignore_ascii_case("select"))?;
            let mut start = words[pos].end;
            if let Some(next) = words.get(pos + 1)
                && next.depth == 0
                && (next.text.eq_ignore_ascii_case("distinct") || next.text.eq_ignore_ascii_case("all"))
            {
                start = next.end;
            }
            (start, words[pos].depth)
        }
        k if k.is_dml() => {
            let returning = words
                .iter()
                .find(|w| w.depth == 0 && w.text.eq_ignore_ascii_case("returning"))?;
            (returning.end, returning.depth)
        }
        _ => return None,
    };

    let end = words
        .iter()
        .filter(|w| w.start >= start && w.depth == depth)
        .find(|w| PROJECTION_END.iter().any(|k| w.text.eq_ignore_ascii_case(k)))
        .map(|w| w.start)
        .unwrap_or(sql.len());

    Some(sql[start..end].trim().trim_end_matches(';').trim())
}

/// Output column names of a statement, in order.
///
/// `None` when the statement projects nothing or uses a wildcard, in
/// which case names cannot be known without running it.
pub fn projected_columns(sql: &str, kind: StatementKind) -> Option<Vec<String>> {
    let text = projection_text(sql, kind)?;
    if text.is_empty() {
        return None;
    }

    let mut columns = Vec::new();
    for expr in split_top_level_commas(text) {
        if expr == "*" || expr.ends_with(".*") {
            return None;
        }
        columns.push(column_name(expr));
    }
    Some(columns)
}

const NOT_AN_ALIAS: &[&str] = &[
    "end", "null", "true", "false", "asc", "desc", "else", "then", "and", "or", "not", "is",
    "in", "like", "glob", "match", "regexp", "escape", "between", "distinct", "collate", "case",
    "when", "current_time", "current_date", "current_timestamp",
];

/// The name a single projected expression is visible under.
pub fn column_name(expr: &str) -> String {
    let expr = expr.trim();

    if let Some(alias) = words(expr)
        .iter()
        .rev()
        .find(|w| w.depth == 0 && w.text.eq_ignore_ascii_case("as"))
    {
        return unquote(expr[alias.end..].trim()).to_string();
    }

    if let Some(alias) = implicit_alias(expr) {
        return unquote(alias).to_string();
    }

    let is_reference = !expr.contains(['(', ' ', '\t', '\r', '\n'])
        && !expr.starts_with(|c: char| c.is_ascii_digit());
    if is_reference && let Some((_, column)) = expr.rsplit_once('.') {
        return unquote(column).to_string();
    }

    unquote(expr).to_string()
}

/// `expr alias` without the `AS` keyword.
fn implicit_alias(expr: &str) -> Option<&str> {
    let split = *top_level_positions(expr, char::is_whitespace).last()?;
    let head = expr[..split].trim_end();
    let tail = expr[split..].trim();
    if head.is_empty() || tail.is_empty() {
        return None;
    }

    let tail_name = unquote(tail);
    let is_identifier = tail_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_')
        && !tail_name.starts_with(|c: char| c.is_ascii_digit());
    if !is_identifier || NOT_AN_ALIAS.iter().any(|k| tail.eq_ignore_ascii_case(k)) {
        return None;
    }

    let ends_expression = head
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric() || "_)'\"`]".contains(c));
    if !ends_expression {
        return None;
    }

    let head_last = head
        .rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("");
    if NOT_AN_ALIAS.iter().any(|k| head_last.eq_ignore_ascii_case(k)) {
        return None;
    }

    Some(tail)
}

fn unquote(name: &str) -> &str {
    let pairs = [('"', '"'), ('`', '`'), ('[', ']'), ('\'', '\'')];
    for (open, close) in pairs {
        if name.len() >= 2
            && let Some(inner) = name.strip_prefix(open).and_then(|n| n.strip_suffix(close))
        {
            return inner;
        }
    }
    name
}
