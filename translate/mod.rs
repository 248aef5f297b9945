//! C6: compiles an AST `Stmt` into something runnable (spec §4.6).
//! `SELECT`/`INSERT`/`UPDATE`/`DELETE` compile to a VDBE `Program`; DDL,
//! transaction control, and `PRAGMA` execute directly against `Schema`/
//! connection state instead (they have no row-at-a-time shape to gain
//! from bytecode, and every AST node they need is already `Clone`).

pub mod display;
pub mod emitter;
pub mod expr;
pub mod main_loop;
pub mod pragma;
pub mod result_row;

use std::rc::Rc;

use crate::ast::{AlterTableStmt, CreateIndexStmt, CreateTableStmt, CreateViewStmt, DropStmt, PragmaStmt, Stmt};
use crate::error::Result;
use crate::function::FunctionRegistry;
use crate::schema::Schema;
use crate::vdbe::Program;

pub use expr::ParamSlot;

/// Statements with no row-oriented execution shape: DDL, transaction
/// control, and `PRAGMA`. Carried as owned AST clones rather than
/// bytecode (spec §4.6 SPEC_FULL supplement decision, recorded in
/// DESIGN.md).
#[derive(Debug, Clone)]
pub enum DirectStmt {
    CreateTable(CreateTableStmt),
    CreateView(CreateViewStmt),
    CreateIndex(CreateIndexStmt),
    Drop(DropStmt),
    AlterTable(AlterTableStmt),
    Begin,
    Commit,
    Rollback { savepoint: Option<String> },
    Savepoint(String),
    Release(String),
    Pragma(PragmaStmt),
}

/// The result of compiling one `Stmt` (spec §4.6).
pub enum CompiledStatement {
    /// A `SELECT`: runs to completion producing zero or more rows.
    Query {
        program: Rc<Program>,
        column_names: Vec<String>,
        params: Vec<ParamSlot>,
    },
    /// `INSERT`/`UPDATE`/`DELETE`: runs to completion producing no rows.
    Write { program: Rc<Program>, params: Vec<ParamSlot> },
    /// DDL/transaction-control/pragma: applied directly, no VDBE involved.
    Direct(DirectStmt),
}

/// Compiles `stmt` against `schema`'s current shape. `functions` resolves
/// scalar/aggregate calls during expression compilation.
pub fn compile(schema: &Schema, functions: &FunctionRegistry, stmt: &Stmt) -> Result<CompiledStatement> {
    match stmt {
        Stmt::Select(select) => {
            let (program, column_names, params) = emitter::compile_select(schema, functions, select)?;
            Ok(CompiledStatement::Query {
                program: Rc::new(program),
                column_names,
                params,
            })
        }
        Stmt::Insert(insert) => {
            let (program, params) = emitter::compile_insert(schema, functions, insert)?;
            Ok(CompiledStatement::Write { program: Rc::new(program), params })
        }
        Stmt::Update(update) => {
            let (program, params) = emitter::compile_update(schema, functions, update)?;
            Ok(CompiledStatement::Write { program: Rc::new(program), params })
        }
        Stmt::Delete(delete) => {
            let (program, params) = emitter::compile_delete(schema, functions, delete)?;
            Ok(CompiledStatement::Write { program: Rc::new(program), params })
        }
        Stmt::CreateTable(s) => Ok(CompiledStatement::Direct(DirectStmt::CreateTable(s.clone()))),
        Stmt::CreateView(s) => Ok(CompiledStatement::Direct(DirectStmt::CreateView(s.clone()))),
        Stmt::CreateIndex(s) => Ok(CompiledStatement::Direct(DirectStmt::CreateIndex(s.clone()))),
        Stmt::Drop(s) => Ok(CompiledStatement::Direct(DirectStmt::Drop(s.clone()))),
        Stmt::AlterTable(s) => Ok(CompiledStatement::Direct(DirectStmt::AlterTable(s.clone()))),
        Stmt::Begin => Ok(CompiledStatement::Direct(DirectStmt::Begin)),
        Stmt::Commit => Ok(CompiledStatement::Direct(DirectStmt::Commit)),
        Stmt::Rollback { savepoint } => Ok(CompiledStatement::Direct(DirectStmt::Rollback { savepoint: savepoint.clone() })),
        Stmt::Savepoint(name) => Ok(CompiledStatement::Direct(DirectStmt::Savepoint(name.clone()))),
        Stmt::Release(name) => Ok(CompiledStatement::Direct(DirectStmt::Release(name.clone()))),
        Stmt::Pragma(p) => Ok(CompiledStatement::Direct(DirectStmt::Pragma(p.clone()))),
    }
}
