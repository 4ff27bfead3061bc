//! Splits a source file into code and comment regions.
//!
//! The lexer never fails: concatenating the text of every returned token
//! reproduces the input exactly, whatever shape the comments are in.
//! Comment openers inside string and character literals stay code, so a
//! generated `db.prepare("... 'http://%'")` survives the next run.

/// Kind of a source region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Code,
    Comment,
}

/// A contiguous region of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    fn code(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TokenKind::Code,
        }
    }

    fn comment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: TokenKind::Comment,
        }
    }

    pub fn is_comment(&self) -> bool {
        self.kind == TokenKind::Comment
    }
}

/// Tracks C++ string and character literals through code text.
///
/// Backslash escapes are honoured and an unescaped newline ends a literal.
/// A `'` inside a numeric literal is a digit separator (`1'000`), while a
/// prefixed character literal (`L'}'`, `u8'{'`) opens a literal.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LiteralTracker {
    quote: Option<char>,
    escaped: bool,
    in_word: bool,
    number: bool,
}

impl LiteralTracker {
    /// Feed one code character. Returns `true` when it is part of a
    /// literal, quotes included.
    pub(crate) fn feed(&mut self, ch: char) -> bool {
        if let Some(quote) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == quote || ch == '\n' {
                self.quote = None;
            }
            return true;
        }

        if ch == '\'' && self.number {
            return false;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' {
            if !self.in_word {
                self.number = ch.is_ascii_digit();
            }
            self.in_word = true;
            return false;
        }

        self.in_word = false;
        self.number = false;
        if ch == '"' || ch == '\'' {
            self.quote = Some(ch);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    PendingSlash,
    Block,
    /// Inside a block comment, directly after a `*`.
    BlockStar,
    Line,
}

/// Tokenize a source file into alternating code and comment tokens.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut literals = LiteralTracker::default();

    for ch in source.chars() {
        current.push(ch);

        match state {
            State::Normal => {
                if !literals.feed(ch) && ch == '/' {
                    state = State::PendingSlash;
                }
            }
            State::PendingSlash => match ch {
                '*' | '/' => {
                    let opener_start = current.len() - 2;
                    if opener_start > 0 {
                        tokens.push(Token::code(&current[..opener_start]));
                    }
                    current.drain(..opener_start);
                    state = if ch == '*' { State::Block } else { State::Line };
                    literals = LiteralTracker::default();
                }
                _ => {
                    literals.feed(ch);
                    state = State::Normal;
                }
            },
            State::Block => {
                if ch == '*' {
                    state = State::BlockStar;
                }
            }
            State::BlockStar => match ch {
                '/' => {
                    tokens.push(Token::comment(std::mem::take(&mut current)));
                    state = State::Normal;
                }
                '*' => {}
                _ => state = State::Block,
            },
            State::Line => {
                if ch == '\n' {
                    // The terminator belongs to the following code.
                    let terminator = if current.ends_with("\r\n") { 2 } else { 1 };
                    let split = current.len() - terminator;
                    let rest = current.split_off(split);
                    tokens.push(Token::comment(std::mem::replace(&mut current, rest)));
                    state = State::Normal;
                }
            }
        }
    }

    if !current.is_empty() {
        match state {
            State::Block | State::BlockStar | State::Line => tokens.push(Token::comment(current)),
            State::Normal | State::PendingSlash => tokens.push(Token::code(current)),
        }
    }

    tokens
}

/// Concatenate token texts back into source text.
pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}
