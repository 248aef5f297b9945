//! Top-level statement compilers (spec §6): one `Program` per
//! INSERT/UPDATE/DELETE/SELECT, wiring `main_loop`/`result_row`/`expr`
//! together. Grounded on the teacher's `translate/emitter.rs` dispatch
//! shape — every program opens with `Init` jumping past its own
//! prologue and closes with `Halt`.

use crate::ast::{ConflictClause, DeleteStmt, InsertStmt, SelectStmt, UpdateStmt};
use crate::error::{Error, Result};
use crate::function::FunctionRegistry;
use crate::schema::Schema;
use crate::vdbe::builder::ProgramBuilder;
use crate::vdbe::{Insn, Program};
use crate::vtab::ConflictPolicy;

use super::expr::{compile_expr, ExprCtx, ParamSlot, TableBinding};
use super::main_loop::{build_bindings, combined_predicate, emit_nested_scan};
use super::result_row::{compile_grouped_select, compile_output_block, compile_simple_select, column_names, has_aggregates};

fn conflict_policy(clause: Option<ConflictClause>) -> ConflictPolicy {
    match clause {
        None | Some(ConflictClause::Abort) => ConflictPolicy::Abort,
        Some(ConflictClause::Rollback) => ConflictPolicy::Rollback,
        Some(ConflictClause::Fail) => ConflictPolicy::Fail,
        Some(ConflictClause::Ignore) => ConflictPolicy::Ignore,
        Some(ConflictClause::Replace) => ConflictPolicy::Replace,
    }
}

fn open_program(b: &mut ProgramBuilder) {
    let start = b.allocate_label();
    b.emit_insn(Insn::Init { target_pc: start });
    b.preassign_label_to_next_insn(start);
}

pub fn compile_select(
    schema: &Schema,
    functions: &FunctionRegistry,
    stmt: &SelectStmt,
) -> Result<(Program, Vec<String>, Vec<ParamSlot>)> {
    let mut b = ProgramBuilder::new();
    let mut params: Vec<ParamSlot> = Vec::new();
    open_program(&mut b);

    let names = match &stmt.from {
        None => {
            if !stmt.group_by.is_empty() || has_aggregates(functions, &stmt.columns) {
                return Err(Error::compile("aggregate queries require a FROM clause in this build"));
            }
            let names = column_names(&stmt.columns);
            let mut ctx = ExprCtx { tables: &[], functions, params: &mut params };
            let block = compile_output_block(&mut b, &mut ctx, &stmt.columns)?;
            b.emit_insn(Insn::ResultRow { start_reg: block, count: names.len() });
            names
        }
        Some(from) => {
            let bindings = build_bindings(schema, from, &mut b)?;
            let where_clause = combined_predicate(stmt.where_clause.as_ref(), from);
            if !stmt.group_by.is_empty() || has_aggregates(functions, &stmt.columns) {
                compile_grouped_select(&mut b, functions, &mut params, &bindings, where_clause.as_ref(), stmt)?
            } else {
                compile_simple_select(&mut b, functions, &mut params, &bindings, where_clause.as_ref(), stmt)?
            }
        }
    };
    b.emit_insn(Insn::Halt { message: None });
    Ok((b.build(), names, params))
}

/// `INSERT`: one `VUpdate` per VALUES row, rowid slot set to `NULL` (per
/// the update calling convention, spec §4.3). Unassigned columns default
/// to `NULL` rather than a declared `DEFAULT` (spec Non-goals: no
/// expression defaults beyond NULL).
pub fn compile_insert(schema: &Schema, functions: &FunctionRegistry, stmt: &InsertStmt) -> Result<(Program, Vec<ParamSlot>)> {
    if stmt.select.is_some() {
        return Err(Error::compile("INSERT ... SELECT is not supported in this build"));
    }
    if !stmt.returning.is_empty() {
        return Err(Error::compile("RETURNING is not supported in this build"));
    }
    let desc = schema
        .get_table(&stmt.table)
        .ok_or_else(|| Error::compile(format!("no such table: {}", stmt.table)))?;
    if desc.is_view() {
        return Err(Error::compile(format!("cannot INSERT into view {}", stmt.table)));
    }
    let vtable = desc
        .table
        .clone()
        .ok_or_else(|| Error::internal(format!("table {} has no storage module attached", desc.name)))?;

    let target_indices: Vec<usize> = if stmt.columns.is_empty() {
        (0..desc.columns.len()).collect()
    } else {
        stmt.columns
            .iter()
            .map(|name| desc.column_index(name).ok_or_else(|| Error::compile(format!("no such column: {name}"))))
            .collect::<Result<Vec<_>>>()?
    };
    let conflict = conflict_policy(stmt.or_conflict);

    let mut b = ProgramBuilder::new();
    let mut params: Vec<ParamSlot> = Vec::new();
    open_program(&mut b);

    for row in &stmt.values {
        if row.len() != target_indices.len() {
            return Err(Error::compile("VALUES row has the wrong number of columns"));
        }
        let block = b.alloc_registers(desc.columns.len() + 1);
        b.emit_insn(Insn::Null { dest: block });
        for i in 0..desc.columns.len() {
            b.emit_insn(Insn::Null { dest: block + 1 + i });
        }
        {
            let mut ctx = ExprCtx { tables: &[], functions, params: &mut params };
            for (slot, expr) in row.iter().enumerate() {
                let r = compile_expr(&mut b, &mut ctx, expr)?;
                b.emit_insn(Insn::SCopy { src: r, dest: block + 1 + target_indices[slot] });
            }
        }
        b.emit_insn(Insn::VUpdate {
            table: vtable.clone(),
            start_reg: block,
            arg_count: desc.columns.len() + 1,
            conflict,
            dest_rowid: None,
        });
    }
    b.emit_insn(Insn::Halt { message: None });
    Ok((b.build(), params))
}

/// `UPDATE`: single-table scan (spec scope cut: no joins on a write
/// target), re-reading every column via `VColumn` so assigned columns can
/// be laid over an otherwise-unchanged row, since the storage module's
/// `update` calling convention always takes the full column list.
pub fn compile_update(schema: &Schema, functions: &FunctionRegistry, stmt: &UpdateStmt) -> Result<(Program, Vec<ParamSlot>)> {
    if !stmt.returning.is_empty() {
        return Err(Error::compile("RETURNING is not supported in this build"));
    }
    let desc = schema
        .get_table(&stmt.table)
        .ok_or_else(|| Error::compile(format!("no such table: {}", stmt.table)))?;
    if desc.is_view() {
        return Err(Error::compile(format!("cannot UPDATE view {}", stmt.table)));
    }
    let vtable = desc
        .table
        .clone()
        .ok_or_else(|| Error::internal(format!("table {} has no storage module attached", desc.name)))?;
    let conflict = conflict_policy(stmt.or_conflict);

    let assignment_idx: Vec<usize> = stmt
        .assignments
        .iter()
        .map(|a| desc.column_index(&a.column).ok_or_else(|| Error::compile(format!("no such column: {}", a.column))))
        .collect::<Result<Vec<_>>>()?;

    let mut b = ProgramBuilder::new();
    let mut params: Vec<ParamSlot> = Vec::new();
    open_program(&mut b);

    let cursor_id = b.alloc_cursor();
    let bindings = vec![TableBinding {
        alias: stmt.table.clone(),
        cursor_id,
        vtable: vtable.clone(),
        columns: desc.columns.clone(),
    }];

    emit_nested_scan(&mut b, functions, &mut params, &bindings, stmt.where_clause.as_ref(), &[], |b, params, _skip_row| {
        let block = b.alloc_registers(desc.columns.len() + 1);
        b.emit_insn(Insn::VRowid { cursor_id, dest: block });
        for i in 0..desc.columns.len() {
            b.emit_insn(Insn::VColumn { cursor_id, column: i, dest: block + 1 + i });
        }
        let mut ctx = ExprCtx { tables: &bindings, functions, params };
        for (assignment, idx) in stmt.assignments.iter().zip(assignment_idx.iter()) {
            let r = compile_expr(b, &mut ctx, &assignment.value)?;
            b.emit_insn(Insn::SCopy { src: r, dest: block + 1 + idx });
        }
        b.emit_insn(Insn::VUpdate {
            table: vtable.clone(),
            start_reg: block,
            arg_count: desc.columns.len() + 1,
            conflict,
            dest_rowid: None,
        });
        Ok(())
    })?;
    b.emit_insn(Insn::Halt { message: None });
    Ok((b.build(), params))
}

/// `DELETE`: single-table scan, one `VUpdate` per matching row with just
/// the rowid slot (spec §4.3 delete calling convention).
pub fn compile_delete(schema: &Schema, functions: &FunctionRegistry, stmt: &DeleteStmt) -> Result<(Program, Vec<ParamSlot>)> {
    if !stmt.returning.is_empty() {
        return Err(Error::compile("RETURNING is not supported in this build"));
    }
    let desc = schema
        .get_table(&stmt.table)
        .ok_or_else(|| Error::compile(format!("no such table: {}", stmt.table)))?;
    if desc.is_view() {
        return Err(Error::compile(format!("cannot DELETE from view {}", stmt.table)));
    }
    let vtable = desc
        .table
        .clone()
        .ok_or_else(|| Error::internal(format!("table {} has no storage module attached", desc.name)))?;

    let mut b = ProgramBuilder::new();
    let mut params: Vec<ParamSlot> = Vec::new();
    open_program(&mut b);

    let cursor_id = b.alloc_cursor();
    let bindings = vec![TableBinding {
        alias: stmt.table.clone(),
        cursor_id,
        vtable: vtable.clone(),
        columns: desc.columns.clone(),
    }];

    emit_nested_scan(&mut b, functions, &mut params, &bindings, stmt.where_clause.as_ref(), &[], |b, _params, _skip_row| {
        let rowid_reg = b.alloc_register();
        b.emit_insn(Insn::VRowid { cursor_id, dest: rowid_reg });
        b.emit_insn(Insn::VUpdate {
            table: vtable.clone(),
            start_reg: rowid_reg,
            arg_count: 1,
            conflict: ConflictPolicy::Abort,
            dest_rowid: None,
        });
        Ok(())
    })?;
    b.emit_insn(Insn::Halt { message: None });
    Ok((b.build(), params))
}
