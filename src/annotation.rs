//! Annotation extraction from comment tokens.
//!
//! Two grammars are understood:
//!
//! ```text
//! /**                                  // @-SQLGenAccess @func int count @sql SELECT ...
//! * @-SQLGenAccess
//! * @func User Users::getUserById
//! * @return int64 id, string name
//! * @sql
//! *      SELECT id, name FROM users WHERE id=:id(int64)
//! */
//! ```
//!
//! A comment carrying annotations claims the first brace-balanced function
//! of the code that follows it. That function is the stub regenerated on
//! every run. A comment with no function after it gets an empty block, and
//! the generated function is inserted right after the comment.

use std::collections::BTreeMap;

use crate::lexer::{LiteralTracker, Token, TokenKind};

/// Directive tags selecting what a block does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Generate and validate against the live schema.
    Access,
    /// Generate without schema validation.
    AccessNoCheck,
    /// Run the block's SQL before generation starts.
    TempSetup,
    /// Output formatting overrides.
    Config,
}

impl Directive {
    pub const ACCESS: &'static str = "-SQLGenAccess";
    pub const ACCESS_NO_CHECK: &'static str = "-SQLGenAccessNoCheck";
    pub const TEMP_SETUP: &'static str = "-SQLGenTempSetup";
    pub const CONFIG: &'static str = "-SQLGenConfig";

    pub fn key(self) -> &'static str {
        match self {
            Directive::Access => Self::ACCESS,
            Directive::AccessNoCheck => Self::ACCESS_NO_CHECK,
            Directive::TempSetup => Self::TEMP_SETUP,
            Directive::Config => Self::CONFIG,
        }
    }
}

/// Key/value pairs parsed from one comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    keys: BTreeMap<String, String>,
}

impl Annotations {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.keys.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The directive of this block, if it has one.
    pub fn directive(&self) -> Option<Directive> {
        [
            Directive::Access,
            Directive::AccessNoCheck,
            Directive::TempSetup,
            Directive::Config,
        ]
        .into_iter()
        .find(|d| self.contains(d.key()))
    }
}

/// An annotated comment's claimed function stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedBlock {
    pub annotations: Annotations,
    /// Brace-balanced function text, empty when none followed the comment.
    pub code: String,
    /// A body was opened after the comment but never closed within the
    /// same code region, usually because a comment sits inside the stub.
    pub unclosed: bool,
}

/// One unit of the working document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Plain(String),
    Annotated(AnnotatedBlock),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Segment::Plain(text) => text,
            Segment::Annotated(block) => &block.code,
        }
    }
}

/// Pair annotation comments with the function stubs following them.
pub fn annotate(tokens: &[Token]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(tokens.len());
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        segments.push(Segment::Plain(token.text.clone()));
        if token.kind != TokenKind::Comment {
            continue;
        }

        let annotations = parse_comment(&token.text);
        if annotations.is_empty() {
            continue;
        }

        let next_code = iter.next_if(|next| next.kind == TokenKind::Code);
        match next_code {
            Some(next) => match extract_first_function(&next.text) {
                Some(function) => {
                    let rest = &next.text[function.len()..];
                    segments.push(Segment::Annotated(AnnotatedBlock {
                        annotations,
                        code: function.to_string(),
                        unclosed: false,
                    }));
                    if !rest.is_empty() {
                        segments.push(Segment::Plain(rest.to_string()));
                    }
                }
                None => {
                    segments.push(Segment::Annotated(AnnotatedBlock {
                        annotations,
                        code: String::new(),
                        unclosed: opens_body(&next.text),
                    }));
                    segments.push(Segment::Plain(next.text.clone()));
                }
            },
            None => segments.push(Segment::Annotated(AnnotatedBlock {
                annotations,
                code: String::new(),
                unclosed: false,
            })),
        }
    }

    segments
}

/// Parse whichever grammar fits the comment.
pub fn parse_comment(comment: &str) -> Annotations {
    if comment.starts_with("//") {
        parse_line_comment(comment)
    } else {
        parse_block_comment(comment)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Seek,
    Key,
    Value,
    /// In a value, directly after a `*` that may close the comment.
    ValueStar,
}

/// Parse a `/** ... */` comment with repeated `@key value` entries.
pub fn parse_block_comment(comment: &str) -> Annotations {
    let mut ret = Annotations::default();
    let mut state = BlockState::Seek;
    let mut key = String::new();
    let mut value = String::new();
    let mut chars = comment.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            BlockState::Seek => {
                if ch == '@' {
                    state = BlockState::Key;
                }
            }
            BlockState::Key => {
                if ch.is_whitespace() {
                    state = BlockState::Value;
                    value.push(ch);
                } else if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    finish_entry(&mut ret, &mut key, &mut value);
                    state = BlockState::Seek;
                } else {
                    key.push(ch);
                }
            }
            BlockState::Value | BlockState::ValueStar => {
                if ch == '\\' && chars.peek() == Some(&'@') {
                    chars.next();
                    value.push('@');
                    state = BlockState::Value;
                } else if ch == '@' {
                    finish_entry(&mut ret, &mut key, &mut value);
                    state = BlockState::Key;
                } else if ch == '*' {
                    value.push(ch);
                    state = BlockState::ValueStar;
                } else if ch == '/' && state == BlockState::ValueStar {
                    // Drop the star that opened the closing `*/`.
                    value.pop();
                    finish_entry(&mut ret, &mut key, &mut value);
                    state = BlockState::Seek;
                } else {
                    value.push(ch);
                    state = BlockState::Value;
                }
            }
        }
    }

    if state != BlockState::Seek {
        finish_entry(&mut ret, &mut key, &mut value);
    }

    ret
}

/// Parse a `// @key value @key value` comment.
pub fn parse_line_comment(comment: &str) -> Annotations {
    let body = comment.trim_start_matches('/');
    let mut ret = Annotations::default();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_key = false;
    let mut started = false;
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\\' && chars.peek() == Some(&'@') {
            chars.next();
            if started {
                value.push('@');
            }
            continue;
        }
        if ch == '@' {
            if started {
                finish_entry(&mut ret, &mut key, &mut value);
            }
            started = true;
            in_key = true;
            continue;
        }
        if !started {
            continue;
        }
        if in_key {
            if ch.is_whitespace() {
                in_key = false;
            } else {
                key.push(ch);
            }
        } else {
            value.push(ch);
        }
    }

    if started {
        finish_entry(&mut ret, &mut key, &mut value);
    }

    ret
}

fn finish_entry(ret: &mut Annotations, key: &mut String, value: &mut String) {
    let name = key.trim();
    if !name.is_empty() {
        ret.insert(name, clean_value(value));
    }
    key.clear();
    value.clear();
}

/// Join wrapped doc-comment lines: the newline plus any following
/// `*`/whitespace continuation collapses into one space.
fn clean_value(raw: &str) -> String {
    let mut ret = String::with_capacity(raw.len());
    let mut in_continuation = false;

    for ch in raw.chars() {
        if in_continuation {
            if matches!(ch, ' ' | '\t' | '*' | '\r' | '\n') {
                continue;
            }
            in_continuation = false;
        } else if ch == '\r' || ch == '\n' {
            in_continuation = true;
            ret.push(' ');
            continue;
        }
        ret.push(ch);
    }

    ret.trim().to_string()
}

/// Return the prefix of `code` up to and including the brace closing the
/// first top-level `{`. Braces inside string and character literals do not
/// count.
pub fn extract_first_function(code: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut literals = LiteralTracker::default();

    for (idx, ch) in code.char_indices() {
        if literals.feed(ch) {
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(&code[..idx + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Whether `code` has a `{` outside literals.
fn opens_body(code: &str) -> bool {
    let mut literals = LiteralTracker::default();
    code.chars().any(|ch| !literals.feed(ch) && ch == '{')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    const DOC: &str = "/**\n* @-SQLGenAccess\n* @func vector<User> Users::getUsers\n* @return int64 id, string name\n* @sql\n*      SELECT id, name\n*      FROM users\n*/";

    #[test]
    fn test_block_comment_entries() {
        let ann = parse_block_comment(DOC);
        assert_eq!(ann.get("-SQLGenAccess"), Some(""));
        assert_eq!(ann.get("func"), Some("vector<User> Users::getUsers"));
        assert_eq!(ann.get("return"), Some("int64 id, string name"));
        assert_eq!(ann.get("sql"), Some("SELECT id, name FROM users"));
        assert_eq!(ann.directive(), Some(Directive::Access));
    }

    #[test]
    fn test_single_line_block_comment() {
        let ann = parse_block_comment("/** @-SQLGenConfig @tab spaces:2 */");
        assert_eq!(ann.get("tab"), Some("spaces:2"));
        assert_eq!(ann.directive(), Some(Directive::Config));

        let ann = parse_block_comment("/* @-SQLGenTempSetup*/");
        assert_eq!(ann.directive(), Some(Directive::TempSetup));
    }

    #[test]
    fn test_escaped_at_in_value() {
        let ann = parse_block_comment("/** @sql SELECT '\\@x' FROM t */");
        assert_eq!(ann.get("sql"), Some("SELECT '@x' FROM t"));
    }

    #[test]
    fn test_line_comment_entries() {
        let ann = parse_line_comment("// @-SQLGenAccessNoCheck @func void drop @sql DROP TABLE t");
        assert_eq!(ann.directive(), Some(Directive::AccessNoCheck));
        assert_eq!(ann.get("func"), Some("void drop"));
        assert_eq!(ann.get("sql"), Some("DROP TABLE t"));
    }

    #[test]
    fn test_plain_comment_has_no_annotations() {
        assert!(parse_comment("// just a note").is_empty());
        assert!(parse_comment("/* a * b */").is_empty());
    }

    #[test]
    fn test_extract_first_function() {
        let code = "\nint f()\n{\n\tif(x) { y(); }\n}\n\nint g() {}";
        assert_eq!(
            extract_first_function(code),
            Some("\nint f()\n{\n\tif(x) { y(); }\n}")
        );
        assert_eq!(extract_first_function("\n\n"), None);
        assert_eq!(extract_first_function("int f() {"), None);
    }

    #[test]
    fn test_extract_ignores_braces_in_literals() {
        let code = "void f() { s = \"}\\\"{\"; c = '}'; n = 1'000; }rest";
        assert_eq!(
            extract_first_function(code),
            Some("void f() { s = \"}\\\"{\"; c = '}'; n = 1'000; }")
        );
    }

    #[test]
    fn test_extract_prefixed_char_literals() {
        let code = "void w()\n{\n\twchar_t c = L'}';\n\tchar16_t d = u'{';\n\tauto e = u8'}';\n}\nrest";
        assert_eq!(
            extract_first_function(code),
            Some("void w()\n{\n\twchar_t c = L'}';\n\tchar16_t d = u'{';\n\tauto e = u8'}';\n}")
        );
        assert_eq!(extract_first_function("int n = 0xFF'FF; void f() {}"), Some("int n = 0xFF'FF; void f() {}"));
    }

    #[test]
    fn test_annotate_marks_unclosed_stub() {
        let source = format!("{}\nvoid f()\n{{ // note\n}}\n", DOC);
        let segments = annotate(&tokenize(&source));
        assert!(matches!(
            &segments[1],
            Segment::Annotated(AnnotatedBlock { code, unclosed: true, .. }) if code.is_empty()
        ));
    }

    #[test]
    fn test_annotate_claims_stub() {
        let source = format!("{}\nUsers::X Users::getUsers()\n{{\n}}\n\n// eof", DOC);
        let segments = annotate(&tokenize(&source));
        let annotated: Vec<&AnnotatedBlock> = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Annotated(b) => Some(b),
                Segment::Plain(_) => None,
            })
            .collect();
        assert_eq!(annotated.len(), 1);
        assert_eq!(annotated[0].code, "\nUsers::X Users::getUsers()\n{\n}");

        let rebuilt: String = segments.iter().map(Segment::text).collect();
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_annotate_without_stub_records_empty_code() {
        let source = format!("{}\n\n/** other */", DOC);
        let segments = annotate(&tokenize(&source));
        assert!(matches!(
            &segments[1],
            Segment::Annotated(AnnotatedBlock { code, unclosed: false, .. }) if code.is_empty()
        ));
        let rebuilt: String = segments.iter().map(Segment::text).collect();
        assert_eq!(rebuilt, source);
    }
}
