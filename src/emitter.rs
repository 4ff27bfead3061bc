//! C++ emission for annotated functions.
//!
//! Every function follows the same template: a cached statement member
//! prepared on first call, one bind per placeholder, then the
//! shape-specific cursor handling.
//!
//! ```text
//! Users::User Users::getUserById(int64_t id)
//! {
//!     if(!_getUserById.prepared())
//!     {
//!         _getUserById=db.prepare("SELECT id, name FROM users WHERE id=?");
//!     }
//!     _getUserById.bind(id);
//!     sqlgen::DatabaseCursor& cursor=_getUserById.cursor();
//!     Users::User ret{};
//!     if(cursor.next())
//!     {
//!         ret.exists=true;
//!         cursor.get(0, ret.id);
//!         cursor.get(1, ret.name);
//!     }
//!     _getUserById.reset();
//!     return ret;
//! }
//! ```

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::GenConfig;
use crate::error::SqlGenResult;
use crate::parser::{ParsedQuery, ReturnField, Signature};
use crate::shape::{RecordRegistry, Shape, param_type};
use crate::validate::ColumnMap;

/// Declarations accumulated across all generated functions.
#[derive(Debug, Clone, Default)]
pub struct GeneratedData {
    /// One indented declaration line per function.
    pub function_decls: String,
    pub records: RecordRegistry,
    /// One cached statement member line per distinct method.
    pub members: String,
    member_names: BTreeSet<String>,
}

impl GeneratedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render all records, ordered by name.
    pub fn render_records(&self, config: &GenConfig) -> String {
        let (i, n) = (&config.indent, &config.newline);
        let mut out = String::new();
        for record in self.records.iter() {
            out.push_str(&format!("{i}struct {}{n}{i}{{{n}", record.name));
            if record.exists {
                out.push_str(&format!("{i}{i}bool exists;{n}"));
            }
            for (ty, name) in &record.fields {
                out.push_str(&format!("{i}{i}{ty} {name};{n}"));
            }
            out.push_str(&format!("{i}}};{n}"));
        }
        out
    }

    fn add_member(&mut self, name: &str, config: &GenConfig) {
        if self.member_names.insert(name.to_string()) {
            self.members.push_str(&format!(
                "{}{} {};{}",
                config.indent, config.query_type, name, config.newline
            ));
        }
    }
}

/// Everything known about one function after validation.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec<'a> {
    pub signature: &'a Signature,
    pub fields: &'a [ReturnField],
    pub query: &'a ParsedQuery,
    pub shape: &'a Shape,
    /// Column positions; `None` reads columns by name.
    pub columns: Option<&'a ColumnMap>,
}

/// Emit the replacement text for one function and record its
/// declarations in `data`.
///
/// Fails without touching `data` when the function's record conflicts
/// with an earlier one.
pub fn emit_function(spec: &FunctionSpec<'_>, config: &GenConfig, data: &mut GeneratedData) -> SqlGenResult<String> {
    data.records.register(spec.shape, spec.fields)?;

    let sig = spec.signature;
    let scope = sig.scope_prefix();
    let member = format!("_{}", sig.method);
    let params = parameter_list(&spec.query.params);

    let mut w = Writer::new(config);
    w.raw(&format!(
        "{}{} {}({}){}{{{}",
        config.newline,
        return_type(spec.shape, &scope),
        sig.qualified_name(),
        params,
        config.newline,
        config.newline
    ));

    w.line(1, &format!("if(!{member}.prepared())"));
    w.line(1, "{");
    w.line(2, &format!("{member}=db.prepare(\"{}\");", escape_literal(&spec.query.sql)));
    w.line(1, "}");

    for param in &spec.query.params {
        if param.ty == "blob" {
            w.line(1, &format!("{member}.bind({0}.data(), {0}.size());", param.name));
        } else {
            w.line(1, &format!("{member}.bind({});", param.name));
        }
    }

    let column = |name: &str| match spec.columns.and_then(|c| c.index_of(name)) {
        Some(idx) => idx.to_string(),
        None => format!("\"{}\"", name),
    };
    let first = spec.fields.first().map(|f| column(&f.name)).unwrap_or_default();

    let mut returns_value = true;
    match spec.shape {
        Shape::Mutation { returns_bool: true } => w.line(1, &format!("bool ret={member}.write();")),
        Shape::Mutation { returns_bool: false } => {
            w.line(1, &format!("{member}.write();"));
            returns_value = false;
        }
        shape => {
            w.line(1, &format!("{}& cursor={member}.cursor();", config.cursor_type));
            let ret_ty = return_type(shape, &scope);
            match shape {
                Shape::RecordCollection { record } => {
                    let exists = data.records.get(record).is_some_and(|r| r.exists);
                    w.line(1, &format!("{ret_ty} ret;"));
                    w.line(1, "while(cursor.next())");
                    w.line(1, "{");
                    w.line(2, "ret.emplace_back();");
                    w.line(2, &format!("{scope}{record}& obj=ret.back();"));
                    if exists {
                        w.line(2, "obj.exists=true;");
                    }
                    for field in spec.fields {
                        w.line(2, &format!("cursor.get({}, obj.{});", column(&field.name), field.name));
                    }
                    w.line(1, "}");
                }
                Shape::ScalarCollection { .. } => {
                    w.line(1, &format!("{ret_ty} ret;"));
                    w.line(1, "while(cursor.next())");
                    w.line(1, "{");
                    w.line(2, "ret.emplace_back();");
                    w.line(2, &format!("cursor.get({first}, ret.back());"));
                    w.line(1, "}");
                }
                Shape::Optional { .. } => {
                    w.line(1, &format!("{ret_ty} ret;"));
                    w.line(1, "if(cursor.next())");
                    w.line(1, "{");
                    w.line(2, "ret.emplace();");
                    w.line(2, &format!("cursor.get({first}, *ret);"));
                    w.line(1, "}");
                }
                Shape::RawScalar { .. } => {
                    w.line(1, &format!("{ret_ty} ret{{}};"));
                    w.line(1, "if(cursor.next())");
                    w.line(1, "{");
                    w.line(2, &format!("cursor.get({first}, ret);"));
                    w.line(1, "}");
                }
                Shape::CondScalar { .. } => {
                    w.line(1, &format!("{ret_ty} ret{{}};"));
                    w.line(1, "if(cursor.next())");
                    w.line(1, "{");
                    w.line(2, "ret.exists=true;");
                    w.line(2, &format!("cursor.get({first}, ret.value);"));
                    w.line(1, "}");
                }
                Shape::CondRecord { .. } => {
                    w.line(1, &format!("{ret_ty} ret{{}};"));
                    w.line(1, "if(cursor.next())");
                    w.line(1, "{");
                    w.line(2, "ret.exists=true;");
                    for field in spec.fields {
                        w.line(2, &format!("cursor.get({}, ret.{});", column(&field.name), field.name));
                    }
                    w.line(1, "}");
                }
                Shape::Mutation { .. } => {}
            }
        }
    }

    if !spec.query.params.is_empty() {
        w.line(1, &format!("{member}.reset();"));
    }
    if returns_value {
        w.line(1, "return ret;");
    }
    w.raw("}");

    data.function_decls.push_str(&format!(
        "{}{} {}({});{}",
        config.indent,
        return_type(spec.shape, ""),
        sig.method,
        params,
        config.newline
    ));
    data.add_member(&member, config);

    debug!(function = %sig.qualified_name(), shape = ?spec.shape, "emitted");
    Ok(w.finish())
}

/// Return type spelling; `scope` qualifies generated records outside the
/// class body.
fn return_type(shape: &Shape, scope: &str) -> String {
    match shape {
        Shape::RecordCollection { record } => format!("std::vector<{scope}{record}>"),
        Shape::ScalarCollection { ty } => format!("std::vector<{ty}>"),
        Shape::Optional { ty } => format!("std::optional<{ty}>"),
        Shape::Mutation { returns_bool: true } => "bool".to_string(),
        Shape::Mutation { returns_bool: false } => "void".to_string(),
        Shape::RawScalar { ty } => ty.clone(),
        Shape::CondScalar { record } | Shape::CondRecord { record } => format!("{scope}{record}"),
    }
}

/// Function parameters, one per distinct placeholder name in first-use order.
fn parameter_list(params: &[ReturnField]) -> String {
    let mut seen = BTreeSet::new();
    params
        .iter()
        .filter(|p| seen.insert(p.name.as_str()))
        .map(|p| format!("{} {}", param_type(&p.ty), p.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_literal(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for ch in sql.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Line-oriented output with the configured indent and terminator.
struct Writer<'a> {
    config: &'a GenConfig,
    out: String,
}

impl<'a> Writer<'a> {
    fn new(config: &'a GenConfig) -> Self {
        Self {
            config,
            out: String::new(),
        }
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(&self.config.indent);
        }
        self.out.push_str(text);
        self.out.push_str(&self.config.newline);
    }

    fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_return_fields, parse_signature, rewrite_placeholders};
    use crate::shape::infer_shape;
    use pretty_assertions::assert_eq;

    fn config() -> GenConfig {
        GenConfig {
            indent: "    ".to_string(),
            newline: "\n".to_string(),
            ..GenConfig::default()
        }
    }

    fn emit(func: &str, ret: &str, sql: &str, columns: Option<&ColumnMap>, data: &mut GeneratedData) -> String {
        let signature = parse_signature(func).unwrap();
        let fields = parse_return_fields(ret).unwrap();
        let query = rewrite_placeholders(sql);
        let shape = infer_shape(&signature, &fields).unwrap();
        let spec = FunctionSpec {
            signature: &signature,
            fields: &fields,
            query: &query,
            shape: &shape,
            columns,
        };
        emit_function(&spec, &config(), data).unwrap()
    }

    #[test]
    fn test_conditional_record_with_indices() {
        let mut data = GeneratedData::new();
        let columns = ColumnMap::new(vec!["id".to_string(), "name".to_string()]);
        let code = emit(
            "User Users::getUserById",
            "int64 id, string name",
            "SELECT id, name FROM users WHERE id=:id(int64)",
            Some(&columns),
            &mut data,
        );
        let expected = "
Users::User Users::getUserById(int64_t id)
{
    if(!_getUserById.prepared())
    {
        _getUserById=db.prepare(\"SELECT id, name FROM users WHERE id=?\");
    }
    _getUserById.bind(id);
    sqlgen::DatabaseCursor& cursor=_getUserById.cursor();
    Users::User ret{};
    if(cursor.next())
    {
        ret.exists=true;
        cursor.get(0, ret.id);
        cursor.get(1, ret.name);
    }
    _getUserById.reset();
    return ret;
}";
        assert_eq!(code, expected);
        assert_eq!(data.function_decls, "    User getUserById(int64_t id);\n");
        assert_eq!(data.members, "    sqlgen::DatabaseQuery _getUserById;\n");
    }

    #[test]
    fn test_collection_by_name() {
        let mut data = GeneratedData::new();
        let code = emit(
            "vector<User> Users::getUsers",
            "int64 id, string name",
            "SELECT * FROM users",
            None,
            &mut data,
        );
        let expected = "
std::vector<Users::User> Users::getUsers()
{
    if(!_getUsers.prepared())
    {
        _getUsers=db.prepare(\"SELECT * FROM users\");
    }
    sqlgen::DatabaseCursor& cursor=_getUsers.cursor();
    std::vector<Users::User> ret;
    while(cursor.next())
    {
        ret.emplace_back();
        Users::User& obj=ret.back();
        cursor.get(\"id\", obj.id);
        cursor.get(\"name\", obj.name);
    }
    return ret;
}";
        assert_eq!(code, expected);
        assert_eq!(data.function_decls, "    std::vector<User> getUsers();\n");
    }

    #[test]
    fn test_mutation_binds_every_occurrence() {
        let mut data = GeneratedData::new();
        let code = emit(
            "bool Files::touch",
            "",
            "UPDATE files SET a=:v(int64), b=:v(int64), data=:data(blob)",
            None,
            &mut data,
        );
        let expected = "
bool Files::touch(int64_t v, const std::string& data)
{
    if(!_touch.prepared())
    {
        _touch=db.prepare(\"UPDATE files SET a=?, b=?, data=?\");
    }
    _touch.bind(v);
    _touch.bind(v);
    _touch.bind(data.data(), data.size());
    bool ret=_touch.write();
    _touch.reset();
    return ret;
}";
        assert_eq!(code, expected);
    }

    #[test]
    fn test_void_mutation_without_params() {
        let mut data = GeneratedData::new();
        let code = emit("void clearAll", "", "DELETE FROM t", None, &mut data);
        assert!(code.ends_with("    _clearAll.write();\n}"), "{}", code);
        assert!(!code.contains("reset"));
        assert!(!code.contains("return"));
    }

    #[test]
    fn test_optional_and_raw_scalars() {
        let mut data = GeneratedData::new();
        let code = emit(
            "optional<string> Users::findName",
            "string name",
            "SELECT name FROM users WHERE id=:id(int64)",
            None,
            &mut data,
        );
        assert!(code.contains("    std::optional<std::string> ret;\n"));
        assert!(code.contains("        ret.emplace();\n        cursor.get(\"name\", *ret);\n"));

        let code = emit(
            "int64_t Users::addUser",
            "int64_raw id",
            "INSERT INTO users (name) VALUES (:name(string)) RETURNING id",
            None,
            &mut data,
        );
        assert!(code.starts_with("\nint64_t Users::addUser(const std::string& name)\n"));
        assert!(code.contains("    int64_t ret{};\n"));
        assert!(data.records.is_empty());
    }

    #[test]
    fn test_cond_scalar_record() {
        let mut data = GeneratedData::new();
        let code = emit(
            "string Users::nameOf",
            "string name",
            "SELECT name FROM users WHERE id=:id(int64)",
            None,
            &mut data,
        );
        assert!(code.contains("    Users::CondString ret{};\n"));
        assert!(code.contains("        cursor.get(\"name\", ret.value);\n"));
        assert_eq!(
            data.render_records(&config()),
            "    struct CondString\n    {\n        bool exists;\n        std::string value;\n    };\n"
        );
    }

    #[test]
    fn test_members_deduplicated_and_sql_escaped() {
        let mut data = GeneratedData::new();
        let code = emit("void run", "", "UPDATE t SET s=\"x\\y\"", None, &mut data);
        assert!(code.contains("_run=db.prepare(\"UPDATE t SET s=\\\"x\\\\y\\\"\");"));
        emit("void run", "", "DELETE FROM t", None, &mut data);
        assert_eq!(data.members.matches("_run;").count(), 1);
        assert_eq!(data.function_decls.matches("void run();").count(), 2);
    }
}
