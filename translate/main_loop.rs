//! FROM/JOIN/WHERE scan-loop emission (spec §4.5, §6), shared by SELECT,
//! UPDATE and DELETE. Grounded on the teacher's `translate/main_loop.rs`:
//! one table opens and filters at a time, each nested inside the previous
//! table's loop body, so a join predicate referencing an outer table's
//! current row is recompiled fresh on every outer iteration.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{Expr, FromClause, OrderingTerm, TableRef};
use crate::error::{Error, Result};
use crate::planner;
use crate::schema::Schema;
use crate::vdbe::builder::ProgramBuilder;
use crate::vdbe::insn::Insn;

use super::expr::{compile_expr, ExprCtx, TableBinding};

fn resolve_table_ref(schema: &Schema, table_ref: &TableRef) -> Result<TableBinding> {
    let desc = schema
        .get_table(&table_ref.name)
        .ok_or_else(|| Error::compile(format!("no such table: {}", table_ref.name)))?;
    if desc.is_view() {
        return Err(Error::compile(format!(
            "{} is a view; querying views is not supported in this build",
            table_ref.name
        )));
    }
    let vtable = desc
        .table
        .clone()
        .ok_or_else(|| Error::internal(format!("table {} has no storage module attached", desc.name)))?;
    Ok(TableBinding {
        alias: table_ref.alias.clone().unwrap_or_else(|| table_ref.name.clone()),
        cursor_id: 0, // filled in by `build_bindings` once the builder hands out an id
        vtable,
        columns: desc.columns.clone(),
    })
}

/// Resolves every table named in `from` against `schema` and allocates a
/// cursor for each, in join order.
pub fn build_bindings(schema: &Schema, from: &FromClause, b: &mut ProgramBuilder) -> Result<Vec<TableBinding>> {
    let mut out = Vec::new();
    let mut first = resolve_table_ref(schema, &from.first)?;
    first.cursor_id = b.alloc_cursor();
    out.push(first);
    for join in &from.joins {
        let mut binding = resolve_table_ref(schema, &join.table)?;
        binding.cursor_id = b.alloc_cursor();
        out.push(binding);
    }
    Ok(out)
}

/// The ON clauses of every join, folded in with the WHERE clause: this
/// engine only supports inner joins, so a join predicate is just another
/// conjunct evaluated once both sides are in scope.
pub fn combined_predicate(where_clause: Option<&Expr>, from: &FromClause) -> Option<Expr> {
    let mut combined = where_clause.cloned();
    for join in &from.joins {
        if let Some(on) = &join.on {
            combined = Some(match combined {
                Some(acc) => Expr::Binary(Box::new(acc), crate::ast::BinaryOp::And, Box::new(on.clone())),
                None => on.clone(),
            });
        }
    }
    combined
}

/// Emits a nested-loop scan over `bindings`, calling `row_action` once per
/// combination of rows that satisfies every WHERE/ON conjunct. Returns
/// whether the first table's `best_index` consumed `order_by` (so the
/// caller can skip an explicit sort).
pub fn emit_nested_scan(
    b: &mut ProgramBuilder,
    functions: &crate::function::FunctionRegistry,
    params: &mut Vec<super::expr::ParamSlot>,
    bindings: &[TableBinding],
    where_clause: Option<&Expr>,
    order_by_for_first: &[OrderingTerm],
    mut row_action: impl FnMut(
        &mut ProgramBuilder,
        &mut Vec<super::expr::ParamSlot>,
        crate::vdbe::insn::BranchOffset,
    ) -> Result<()>,
) -> Result<bool> {
    let conjuncts: Vec<&Expr> = where_clause.map(planner::split_conjuncts).unwrap_or_default();
    let mut omitted: HashSet<usize> = HashSet::new();
    let mut order_consumed = false;

    struct Level {
        cursor_id: usize,
        loop_top: crate::vdbe::insn::BranchOffset,
        empty_label: crate::vdbe::insn::BranchOffset,
    }
    let mut levels = Vec::with_capacity(bindings.len());
    let mut positioned: HashSet<String> = HashSet::new();

    for (i, binding) in bindings.iter().enumerate() {
        let order_by = if i == 0 { order_by_for_first } else { &[] };
        let plan = planner::plan_scan(
            binding.vtable.as_ref(),
            &conjuncts,
            Some(binding.alias.as_str()),
            &binding.columns,
            &positioned,
            order_by,
        );
        if i == 0 && !order_by.is_empty() {
            order_consumed = plan.index_info.order_by_consumed;
        }
        omitted.extend(plan.omit_conjuncts.iter().copied());

        b.emit_insn(Insn::VOpen { cursor_id: binding.cursor_id, table: binding.vtable.clone() });

        let arg_count = plan.filter_args.len();
        let args_reg = b.alloc_registers(arg_count.max(1));
        {
            let mut ctx = ExprCtx { tables: bindings, functions, params };
            for (slot, (_, value_expr)) in plan.filter_args.iter().enumerate() {
                let r = compile_expr(b, &mut ctx, value_expr)?;
                b.emit_insn(Insn::SCopy { src: r, dest: args_reg + slot });
            }
        }
        let idx_str_reg = match &plan.index_info.idx_str {
            Some(s) => {
                let r = b.alloc_register();
                b.emit_insn(Insn::String8 { value: s.clone(), dest: r });
                Some(r)
            }
            None => None,
        };
        let empty_label = b.allocate_label();
        b.emit_insn(Insn::VFilter {
            cursor_id: binding.cursor_id,
            idx_num: plan.index_info.idx_num,
            idx_str_reg,
            args_reg,
            arg_count,
            pc_if_empty: empty_label,
        });
        let loop_top = b.allocate_label();
        b.preassign_label_to_next_insn(loop_top);
        levels.push(Level { cursor_id: binding.cursor_id, loop_top, empty_label });
        positioned.insert(binding.alias.clone());
    }

    let skip_row = b.allocate_label();
    {
        let mut ctx = ExprCtx { tables: bindings, functions, params };
        for (idx, conjunct) in conjuncts.iter().enumerate() {
            if omitted.contains(&idx) {
                continue;
            }
            let r = compile_expr(b, &mut ctx, conjunct)?;
            b.emit_insn(Insn::IfNot { reg: r, target_pc: skip_row, jump_if_null: true });
        }
    }
    row_action(b, params, skip_row)?;
    b.preassign_label_to_next_insn(skip_row);

    for level in levels.into_iter().rev() {
        b.emit_insn(Insn::VNext { cursor_id: level.cursor_id, pc_if_next: level.loop_top });
        b.preassign_label_to_next_insn(level.empty_label);
    }

    Ok(order_consumed)
}
