//! Shape inference and generated record bookkeeping.
//!
//! The declared `@func` return type and the `@return` field list decide
//! which code pattern a function gets:
//!
//! | `@func` type    | `@return`          | Shape              |
//! |-----------------|--------------------|--------------------|
//! | `vector<T>`     | 2+ fields          | collection of `T`  |
//! | `vector<T>`     | 1 field            | collection of scalar |
//! | `optional<T>`   | exactly 1 field    | optional scalar    |
//! | `void` / `bool` | any                | mutation           |
//! | any other       | 1 `_raw` field     | raw scalar         |
//! | any other       | 1 field            | `CondX` wrapper    |
//! | any other       | 2+ fields          | record with `exists` |

use std::collections::BTreeMap;

use crate::error::{SqlGenError, SqlGenResult};
use crate::parser::{ReturnField, Signature, TypeSpec};

const BUILTIN_TYPES: &[&str] = &[
    "string",
    "std::string",
    "blob",
    "int",
    "int64",
    "int64_t",
    "double",
    "bool",
    "void",
];

/// Map an annotation type to its C++ spelling. `_raw` is stripped first.
pub fn cpp_type(ty: &str) -> &str {
    let ty = ty.strip_suffix("_raw").unwrap_or(ty);
    match ty {
        "string" | "blob" => "std::string",
        "int64" => "int64_t",
        other => other,
    }
}

/// C++ spelling of a function parameter of annotation type `ty`.
pub fn param_type(ty: &str) -> &str {
    match ty {
        "string" | "std::string" | "blob" => "const std::string&",
        other => cpp_type(other),
    }
}

pub fn is_builtin(ty: &str) -> bool {
    BUILTIN_TYPES.contains(&ty)
}

/// Wrapper record name for a conditional scalar: `string` and
/// `std::string` → `CondString`, `int64_t` → `CondInt64`.
pub fn cond_record_name(ty: &str) -> String {
    let ty = ty.strip_suffix("_raw").unwrap_or(ty);
    let ty = ty.strip_prefix("std::").unwrap_or(ty);
    let ty = ty.strip_suffix("_t").unwrap_or(ty);

    let mut name = String::from("Cond");
    let mut upper = true;
    for ch in ty.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
        if upper {
            name.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            name.push(ch);
        }
    }
    name
}

/// Generated code pattern for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// `std::vector<Record>`, one record per row.
    RecordCollection { record: String },
    /// `std::vector<T>` of a single column.
    ScalarCollection { ty: String },
    /// `std::optional<T>`, empty when no row matched.
    Optional { ty: String },
    /// No cursor; `bool` returns the write result.
    Mutation { returns_bool: bool },
    /// A single value known to exist, e.g. `RETURNING id`.
    RawScalar { ty: String },
    /// `CondX { exists, value }`.
    CondScalar { record: String },
    /// A record with an `exists` flag.
    CondRecord { record: String },
}

impl Shape {
    /// Whether the generated code reads rows through a cursor.
    pub fn reads_rows(&self) -> bool {
        !matches!(self, Shape::Mutation { .. })
    }

    /// The record this shape needs, with whether it requires `exists`.
    pub fn record(&self) -> Option<(&str, bool)> {
        match self {
            Shape::RecordCollection { record } => Some((record.as_str(), false)),
            Shape::CondScalar { record } | Shape::CondRecord { record } => Some((record.as_str(), true)),
            _ => None,
        }
    }
}

/// Decide the shape of a function from its signature and `@return` fields.
pub fn infer_shape(signature: &Signature, fields: &[ReturnField]) -> SqlGenResult<Shape> {
    let function = signature.qualified_name();
    let missing_return = || SqlGenError::annotation(&function, "@return is missing");

    let shape = match &signature.return_type {
        TypeSpec::Collection(inner) => match fields {
            [] => return Err(missing_return()),
            [field] => Shape::ScalarCollection {
                ty: cpp_type(&field.ty).to_string(),
            },
            _ => Shape::RecordCollection {
                record: record_name(&function, inner)?,
            },
        },
        TypeSpec::Optional(_) => match fields {
            [field] => Shape::Optional {
                ty: cpp_type(&field.ty).to_string(),
            },
            _ => {
                return Err(SqlGenError::annotation(
                    &function,
                    format!("optional return needs exactly one @return field, found {}", fields.len()),
                ));
            }
        },
        TypeSpec::Plain(ty) if ty.eq_ignore_ascii_case("void") => {
            Shape::Mutation { returns_bool: false }
        }
        TypeSpec::Plain(ty) if ty.eq_ignore_ascii_case("bool") => {
            Shape::Mutation { returns_bool: true }
        }
        TypeSpec::Plain(ty) => match fields {
            [] => return Err(missing_return()),
            [field] if field.is_raw() => Shape::RawScalar {
                ty: cpp_type(&field.ty).to_string(),
            },
            [field] => Shape::CondScalar {
                record: cond_record_name(&field.ty),
            },
            _ => Shape::CondRecord {
                record: record_name(&function, ty)?,
            },
        },
    };

    Ok(shape)
}

fn record_name(function: &str, ty: &str) -> SqlGenResult<String> {
    if is_builtin(ty) {
        return Err(SqlGenError::annotation(
            function,
            format!("'{}' cannot hold multiple @return fields, declare a record type", ty),
        ));
    }
    Ok(ty.to_string())
}

/// A generated struct declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    /// `(C++ type, name)` pairs in declaration order.
    pub fields: Vec<(String, String)>,
    pub exists: bool,
}

impl Record {
    fn describe(fields: &[(String, String)]) -> String {
        fields
            .iter()
            .map(|(ty, name)| format!("{} {}", ty, name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Records generated so far, keyed by name and checked by structure.
#[derive(Debug, Clone, Default)]
pub struct RecordRegistry {
    records: BTreeMap<String, Record>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the record a shape needs.
    ///
    /// A known name with the same fields is reused and its `exists` flag
    /// only ever turns on. A known name with different fields is a
    /// [`SqlGenError::RecordConflict`] and leaves the registry unchanged.
    pub fn register(&mut self, shape: &Shape, fields: &[ReturnField]) -> SqlGenResult<()> {
        let Some((name, exists)) = shape.record() else {
            return Ok(());
        };

        let fields: Vec<(String, String)> = match shape {
            Shape::CondScalar { .. } => fields
                .iter()
                .take(1)
                .map(|f| (cpp_type(&f.ty).to_string(), "value".to_string()))
                .collect(),
            _ => fields
                .iter()
                .map(|f| (cpp_type(&f.ty).to_string(), f.name.clone()))
                .collect(),
        };

        match self.records.get_mut(name) {
            Some(record) if record.fields == fields => {
                record.exists |= exists;
                Ok(())
            }
            Some(record) => Err(SqlGenError::RecordConflict {
                name: name.to_string(),
                existing: Record::describe(&record.fields),
                requested: Record::describe(&fields),
            }),
            None => {
                self.records.insert(
                    name.to_string(),
                    Record {
                        name: name.to_string(),
                        fields,
                        exists,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    /// Records ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
