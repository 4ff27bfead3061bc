//! Annotation micro-grammar using nom.
//!
//! Parses the payload of `@func`, `@return` and the `:name(type)`
//! placeholders of `@sql`.
//!
//! ```text
//! @func   vector<User> Users::getUsers
//!         ─────┬────── ──┬── ────┬────
//!              │         │       └── method
//!              │         └── class (optional)
//!              └── return type (bare, vector<T> or optional<T>)
//!
//! @return int64 id, string name
//! @sql    SELECT id, name FROM users WHERE id=:id(int64)
//!                                             ─────┬────
//!                                                  └── placeholder, becomes `?`
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, opt, recognize},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::error::{SqlGenError, SqlGenResult};

/// A declared `type name` pair, from `@return` or a SQL placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReturnField {
    pub ty: String,
    pub name: String,
}

impl ReturnField {
    pub fn new(ty: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            name: name.into(),
        }
    }

    /// Whether the type carries the `_raw` marker.
    pub fn is_raw(&self) -> bool {
        self.ty.ends_with("_raw")
    }

    /// The type with any `_raw` marker removed.
    pub fn base_type(&self) -> &str {
        self.ty.strip_suffix("_raw").unwrap_or(&self.ty)
    }
}

/// Declared return type of a generated function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    Plain(String),
    /// `vector<T>` / `std::vector<T>`
    Collection(String),
    /// `optional<T>` / `std::optional<T>`
    Optional(String),
}

impl TypeSpec {
    fn from_token(token: &str) -> Self {
        let wrapped = |prefix: &str| {
            token
                .strip_prefix("std::")
                .unwrap_or(token)
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix('>'))
                .map(|inner| inner.trim().to_string())
        };
        if let Some(inner) = wrapped("vector<") {
            TypeSpec::Collection(inner)
        } else if let Some(inner) = wrapped("optional<") {
            TypeSpec::Optional(inner)
        } else {
            TypeSpec::Plain(token.to_string())
        }
    }
}

/// Parsed `@func` signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub return_type: TypeSpec,
    /// Enclosing class, e.g. `Users` in `Users::getUsers`.
    pub class: Option<String>,
    pub method: String,
}

impl Signature {
    /// `Class::method`, or just `method` for free functions.
    pub fn qualified_name(&self) -> String {
        match &self.class {
            Some(class) => format!("{}::{}", class, self.method),
            None => self.method.clone(),
        }
    }

    /// Prefix used to qualify class-scoped types outside the class body.
    pub fn scope_prefix(&self) -> String {
        self.class
            .as_ref()
            .map(|class| format!("{}::", class))
            .unwrap_or_default()
    }
}

/// SQL with placeholders replaced by positional `?` markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub sql: String,
    /// One entry per `?`, in bind order.
    pub params: Vec<ReturnField>,
}

/// Parse the `@func` annotation value.
pub fn parse_signature(func: &str) -> SqlGenResult<Signature> {
    check_angles(func)?;

    let parsed = all_consuming(delimited(
        multispace0,
        separated_pair(type_token, multispace1, terminated(qualified_name, opt(tag("()")))),
        multispace0,
    ))(func);

    let (_, (ty, name)) = parsed.map_err(|_| {
        SqlGenError::annotation(
            func,
            "malformed @func, expected '<returnType> [Class::]method'",
        )
    })?;

    let (class, method) = match name.rsplit_once("::") {
        Some((class, method)) => (Some(class.to_string()), method.to_string()),
        None => (None, name.to_string()),
    };

    Ok(Signature {
        return_type: TypeSpec::from_token(ty),
        class,
        method,
    })
}

/// Parse the `@return` annotation value into an ordered field list.
pub fn parse_return_fields(fields: &str) -> SqlGenResult<Vec<ReturnField>> {
    check_angles(fields)?;

    let field = separated_pair(type_token, multispace1, identifier);
    let parsed = all_consuming(delimited(
        multispace0,
        separated_list0(delimited(multispace0, char(','), multispace0), field),
        multispace0,
    ))(fields);

    let (_, list) = parsed.map_err(|_| {
        SqlGenError::annotation(
            fields,
            "malformed @return, expected '<type> <name>[, <type> <name>...]'",
        )
    })?;

    Ok(list
        .into_iter()
        .map(|(ty, name)| ReturnField::new(ty, name))
        .collect())
}

/// Replace every `:name(type)` placeholder with `?`, left to right.
///
/// Repeated names produce one parameter per occurrence.
pub fn rewrite_placeholders(sql: &str) -> ParsedQuery {
    let mut out = String::with_capacity(sql.len());
    let mut params = Vec::new();
    let mut last = 0;
    let mut pos = 0;

    while let Some(offset) = sql[pos..].find(':') {
        let start = pos + offset;
        match placeholder(&sql[start..]) {
            Ok((rest, (name, ty))) => {
                out.push_str(&sql[last..start]);
                out.push('?');
                params.push(ReturnField::new(ty.trim(), name));
                last = sql.len() - rest.len();
                pos = last;
            }
            Err(_) => pos = start + 1,
        }
    }
    out.push_str(&sql[last..]);

    ParsedQuery { sql: out, params }
}

fn placeholder(input: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        char(':'),
        pair(
            take_while1(|c: char| !c.is_whitespace() && !"():,".contains(c)),
            delimited(char('('), take_while1(|c: char| c != ')'), char(')')),
        ),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn qualified_name(input: &str) -> IResult<&str, &str> {
    recognize(separated_list1(tag("::"), identifier))(input)
}

/// A type spelling such as `int64`, `std::string` or `std::vector<User>`.
fn type_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == ':'),
        opt(angle_group),
    ))(input)
}

fn angle_group(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('<'),
        many0(alt((angle_group, take_while1(|c: char| c != '<' && c != '>')))),
        char('>'),
    )))(input)
}

fn check_angles(text: &str) -> SqlGenResult<()> {
    let mut depth = 0i32;
    for ch in text.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        return Err(SqlGenError::annotation(text, "unmatched '<' or '>' in type"));
    }
    Ok(())
}
