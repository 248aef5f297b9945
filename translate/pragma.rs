//! `PRAGMA` handling (spec §6 "Pragmas recognized"). Pragmas bind
//! `Schema`'s default virtual-table module rather than produce bytecode,
//! so they're applied directly by the statement façade rather than run
//! through the VDBE — same direct-execution treatment as DDL and
//! transaction control (`translate/mod.rs`'s `DirectStmt`).

use crate::ast::PragmaStmt;
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::Value;

fn literal_text(stmt: &PragmaStmt) -> Result<String> {
    match &stmt.value {
        Some(crate::ast::Expr::Literal(Value::Text(s))) => Ok(s.clone()),
        Some(crate::ast::Expr::Literal(Value::Integer(i))) => Ok(i.to_string()),
        Some(_) => Err(Error::compile(format!("PRAGMA {} requires a literal value", stmt.name))),
        None => Err(Error::compile(format!("PRAGMA {} requires a value", stmt.name))),
    }
}

/// Applies a recognized pragma to `schema`; unrecognized names are a
/// warning, not an error (spec §6).
pub fn apply_pragma(schema: &mut Schema, stmt: &PragmaStmt) -> Result<()> {
    match stmt.name.to_ascii_lowercase().as_str() {
        "default_vtab_module" => {
            schema.default_vtab_module = literal_text(stmt)?;
        }
        "default_vtab_args" => {
            let raw = literal_text(stmt)?;
            schema.default_vtab_args = raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        other => {
            tracing::warn!(pragma = other, "unrecognized PRAGMA, ignored");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn default_vtab_module_pragma_sets_schema_field() {
        let mut schema = Schema::new();
        let stmt = PragmaStmt { name: "default_vtab_module".into(), value: Some(Expr::Literal(Value::Text("mem".into()))) };
        apply_pragma(&mut schema, &stmt).unwrap();
        assert_eq!(schema.default_vtab_module, "mem");
    }

    #[test]
    fn default_vtab_args_pragma_splits_on_comma() {
        let mut schema = Schema::new();
        let stmt = PragmaStmt {
            name: "default_vtab_args".into(),
            value: Some(Expr::Literal(Value::Text("a, b ,c".into()))),
        };
        apply_pragma(&mut schema, &stmt).unwrap();
        assert_eq!(schema.default_vtab_args, vec!["a", "b", "c"]);
    }

    #[test]
    fn unrecognized_pragma_is_ignored_not_an_error() {
        let mut schema = Schema::new();
        let stmt = PragmaStmt { name: "cache_size".into(), value: Some(Expr::Literal(Value::Integer(100))) };
        assert!(apply_pragma(&mut schema, &stmt).is_ok());
    }
}
