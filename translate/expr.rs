//! AST `Expr` -> register compiler (spec §6). Every scalar expression
//! becomes a short run of VDBE instructions ending with its value in a
//! fresh register; comparisons and boolean connectives materialize a
//! three-valued `Value::Bool`/`Value::Null` rather than jumping, since an
//! expression can appear anywhere a value is wanted (a result column, a
//! CASE branch), not just in WHERE residue.
//!
//! Grounded on the teacher's `translate/expr.rs` register-allocation style
//! (each subexpression gets its own register, combined via short insn
//! sequences) and its `translate/main_loop.rs` use of `IfNot`/`Compare` to
//! build boolean logic out of jump opcodes.

use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, ParamRef, UnaryOp};
use crate::error::{Error, Result};
use crate::function::FunctionRegistry;
use crate::schema::Column;
use crate::value::Value;
use crate::vdbe::builder::ProgramBuilder;
use crate::vdbe::insn::{CmpInsFlags, CompareOp, CursorId, Insn, Register};
use crate::vtab::VTable;

/// One table positioned in the current scan, keyed by alias for column
/// resolution.
pub struct TableBinding {
    pub alias: String,
    pub cursor_id: CursorId,
    pub vtable: Rc<dyn VTable>,
    pub columns: Vec<Column>,
}

impl TableBinding {
    fn resolve(&self, table: Option<&str>, name: &str) -> Option<usize> {
        if let Some(t) = table {
            if !t.eq_ignore_ascii_case(&self.alias) {
                return None;
            }
        }
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A bound parameter: the placeholder as written, and the register it was
/// assigned. `bind()` fills these in by name/index before `step()`.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub param: ParamRef,
    pub register: Register,
}

pub struct ExprCtx<'a> {
    pub tables: &'a [TableBinding],
    pub functions: &'a FunctionRegistry,
    pub params: &'a mut Vec<ParamSlot>,
}

impl<'a> ExprCtx<'a> {
    fn param_register(&mut self, b: &mut ProgramBuilder, param: &ParamRef) -> Register {
        if let Some(slot) = self.params.iter().find(|s| &s.param == param) {
            return slot.register;
        }
        let reg = b.alloc_register();
        // Placeholder; `Statement::bind` overwrites this register before
        // the first `step()`. NULL is the correct default for an unbound
        // parameter.
        b.emit_insn(Insn::Null { dest: reg });
        self.params.push(ParamSlot { param: param.clone(), register: reg });
        reg
    }

    fn resolve_column(&self, table: Option<&str>, name: &str) -> Result<(&TableBinding, usize)> {
        if name.eq_ignore_ascii_case("rowid") {
            if let Some(t) = table {
                let binding = self
                    .tables
                    .iter()
                    .find(|b| b.alias.eq_ignore_ascii_case(t))
                    .ok_or_else(|| Error::compile(format!("no such table: {t}")))?;
                return Ok((binding, usize::MAX));
            }
            if self.tables.len() == 1 {
                return Ok((&self.tables[0], usize::MAX));
            }
            return Err(Error::compile("ambiguous column: rowid"));
        }
        let mut found = None;
        for binding in self.tables {
            if let Some(idx) = binding.resolve(table, name) {
                if found.is_some() {
                    return Err(Error::compile(format!("ambiguous column: {name}")));
                }
                found = Some((binding, idx));
            }
        }
        found.ok_or_else(|| Error::compile(format!("no such column: {name}")))
    }
}

/// Compiles `expr` into a fresh register holding its value.
pub fn compile_expr(b: &mut ProgramBuilder, ctx: &mut ExprCtx, expr: &Expr) -> Result<Register> {
    match expr {
        Expr::Literal(v) => Ok(load_literal(b, v)),
        Expr::Parameter(p) => Ok(ctx.param_register(b, p)),
        Expr::Column { table, name } => {
            let (binding, idx) = ctx.resolve_column(table.as_deref(), name)?;
            let dest = b.alloc_register();
            if idx == usize::MAX {
                b.emit_insn(Insn::VRowid { cursor_id: binding.cursor_id, dest });
            } else {
                b.emit_insn(Insn::VColumn { cursor_id: binding.cursor_id, column: idx, dest });
            }
            Ok(dest)
        }
        Expr::Binary(lhs, op, rhs) => compile_binary(b, ctx, lhs, *op, rhs),
        Expr::Unary(op, inner) => compile_unary(b, ctx, *op, inner),
        Expr::Between { expr, lo, hi, negated } => {
            let v = compile_expr(b, ctx, expr)?;
            let lo_r = compile_expr(b, ctx, lo)?;
            let hi_r = compile_expr(b, ctx, hi)?;
            let ge = b.alloc_register();
            compile_cmp_value(b, ge, v, lo_r, CompareOp::Ge);
            let le = b.alloc_register();
            compile_cmp_value(b, le, v, hi_r, CompareOp::Le);
            let dest = b.alloc_register();
            compile_and_two_values(b, dest, ge, le);
            if *negated {
                let neg = b.alloc_register();
                b.emit_insn(Insn::Not { src: dest, dest: neg });
                Ok(neg)
            } else {
                Ok(dest)
            }
        }
        Expr::InList { expr, list, negated } => {
            let v = compile_expr(b, ctx, expr)?;
            let dest = b.alloc_register();
            if list.is_empty() {
                b.emit_insn(Insn::Bool { value: false, dest });
            } else {
                let mut acc: Option<Register> = None;
                for item in list {
                    let item_r = compile_expr(b, ctx, item)?;
                    let eq = b.alloc_register();
                    compile_cmp_value(b, eq, v, item_r, CompareOp::Eq);
                    acc = Some(match acc {
                        None => eq,
                        Some(prev) => {
                            let combined = b.alloc_register();
                            compile_or_two_values(b, combined, prev, eq);
                            combined
                        }
                    });
                }
                b.emit_insn(Insn::SCopy { src: acc.unwrap(), dest });
            }
            if *negated {
                let neg = b.alloc_register();
                b.emit_insn(Insn::Not { src: dest, dest: neg });
                Ok(neg)
            } else {
                Ok(dest)
            }
        }
        Expr::FunctionCall { name, args, distinct: _, filter } => {
            if ctx.functions.is_aggregate(name) {
                return Err(Error::compile(format!(
                    "aggregate function {name} may only appear as a bare result column"
                )));
            }
            if filter.is_some() {
                return Err(Error::compile("FILTER is not supported in this build"));
            }
            ctx.functions
                .get_scalar(name)
                .ok_or_else(|| Error::compile(format!("no such function: {name}")))?;
            let start = b.alloc_registers(args.len().max(1));
            for (i, arg) in args.iter().enumerate() {
                let r = compile_expr(b, ctx, arg)?;
                b.emit_insn(Insn::SCopy { src: r, dest: start + i });
            }
            let dest = b.alloc_register();
            b.emit_insn(Insn::Function {
                func_name: name.clone(),
                start_reg: start,
                arg_count: args.len(),
                dest,
            });
            Ok(dest)
        }
        Expr::Collate { expr, collation } => {
            if !collation.eq_ignore_ascii_case("binary") {
                return Err(Error::compile(format!("no such collation: {collation}")));
            }
            compile_expr(b, ctx, expr)
        }
        Expr::Case { operand, whens, else_ } => compile_case(b, ctx, operand.as_deref(), whens, else_.as_deref()),
        Expr::Cast { .. } => Err(Error::compile("CAST is not supported in this build")),
        Expr::InSubquery { .. } | Expr::Exists { .. } | Expr::ScalarSubquery(_) => {
            Err(Error::compile("subqueries are not supported in this build"))
        }
        Expr::WindowFunctionCall { .. } => Err(Error::compile("window functions are not supported in this build")),
    }
}

fn load_literal(b: &mut ProgramBuilder, v: &Value) -> Register {
    let dest = b.alloc_register();
    match v {
        Value::Null => b.emit_insn(Insn::Null { dest }),
        Value::Integer(i) => b.emit_insn(Insn::Integer { value: *i, dest }),
        Value::Real(f) => b.emit_insn(Insn::Real { value: *f, dest }),
        Value::Text(s) => b.emit_insn(Insn::String8 { value: s.clone(), dest }),
        Value::Blob(blob) => b.emit_insn(Insn::Blob { value: blob.clone(), dest }),
        Value::Bool(bv) => b.emit_insn(Insn::Bool { value: *bv, dest }),
    };
    dest
}

fn compile_unary(b: &mut ProgramBuilder, ctx: &mut ExprCtx, op: UnaryOp, inner: &Expr) -> Result<Register> {
    match op {
        UnaryOp::Negative => {
            let src = compile_expr(b, ctx, inner)?;
            let dest = b.alloc_register();
            b.emit_insn(Insn::Negative { src, dest });
            Ok(dest)
        }
        UnaryOp::Not => {
            let src = compile_expr(b, ctx, inner)?;
            let dest = b.alloc_register();
            b.emit_insn(Insn::Not { src, dest });
            Ok(dest)
        }
        UnaryOp::BitNot => {
            let src = compile_expr(b, ctx, inner)?;
            let dest = b.alloc_register();
            b.emit_insn(Insn::BitNot { src, dest });
            Ok(dest)
        }
        UnaryOp::IsNull | UnaryOp::NotNull => {
            let src = compile_expr(b, ctx, inner)?;
            let dest = b.alloc_register();
            let hit = b.allocate_label();
            let end = b.allocate_label();
            b.emit_insn(Insn::IsNull { reg: src, target_pc: hit });
            let (fallthrough_val, hit_val) = match op {
                UnaryOp::IsNull => (false, true),
                _ => (true, false),
            };
            b.emit_insn(Insn::Bool { value: fallthrough_val, dest });
            b.emit_insn(Insn::Goto { target_pc: end });
            b.preassign_label_to_next_insn(hit);
            b.emit_insn(Insn::Bool { value: hit_val, dest });
            b.preassign_label_to_next_insn(end);
            Ok(dest)
        }
    }
}

fn compile_binary(
    b: &mut ProgramBuilder,
    ctx: &mut ExprCtx,
    lhs: &Expr,
    op: BinaryOp,
    rhs: &Expr,
) -> Result<Register> {
    match op {
        BinaryOp::And => {
            let l = compile_expr(b, ctx, lhs)?;
            let r = compile_expr(b, ctx, rhs)?;
            let dest = b.alloc_register();
            compile_and_two_values(b, dest, l, r);
            Ok(dest)
        }
        BinaryOp::Or => {
            let l = compile_expr(b, ctx, lhs)?;
            let r = compile_expr(b, ctx, rhs)?;
            let dest = b.alloc_register();
            compile_or_two_values(b, dest, l, r);
            Ok(dest)
        }
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let l = compile_expr(b, ctx, lhs)?;
            let r = compile_expr(b, ctx, rhs)?;
            let dest = b.alloc_register();
            let cop = match op {
                BinaryOp::Eq => CompareOp::Eq,
                BinaryOp::Ne => CompareOp::Ne,
                BinaryOp::Lt => CompareOp::Lt,
                BinaryOp::Le => CompareOp::Le,
                BinaryOp::Gt => CompareOp::Gt,
                BinaryOp::Ge => CompareOp::Ge,
                _ => unreachable!(),
            };
            compile_cmp_value(b, dest, l, r, cop);
            Ok(dest)
        }
        BinaryOp::Is | BinaryOp::IsNot => {
            let l = compile_expr(b, ctx, lhs)?;
            let r = compile_expr(b, ctx, rhs)?;
            let dest = b.alloc_register();
            compile_is_value(b, dest, l, r, op == BinaryOp::IsNot);
            Ok(dest)
        }
        _ => {
            let l = compile_expr(b, ctx, lhs)?;
            let r = compile_expr(b, ctx, rhs)?;
            let dest = b.alloc_register();
            let insn = match op {
                BinaryOp::Add => Insn::Add { lhs: l, rhs: r, dest },
                BinaryOp::Sub => Insn::Subtract { lhs: l, rhs: r, dest },
                BinaryOp::Mul => Insn::Multiply { lhs: l, rhs: r, dest },
                BinaryOp::Div => Insn::Divide { lhs: l, rhs: r, dest },
                BinaryOp::Rem => Insn::Remainder { lhs: l, rhs: r, dest },
                BinaryOp::Concat => Insn::Concat { lhs: l, rhs: r, dest },
                BinaryOp::BitAnd => Insn::BitAnd { lhs: l, rhs: r, dest },
                BinaryOp::BitOr => Insn::BitOr { lhs: l, rhs: r, dest },
                BinaryOp::ShiftLeft => Insn::ShiftLeft { lhs: l, rhs: r, dest },
                BinaryOp::ShiftRight => Insn::ShiftRight { lhs: l, rhs: r, dest },
                _ => unreachable!(),
            };
            b.emit_insn(insn);
            Ok(dest)
        }
    }
}

/// Materializes `lhs OP rhs` as a three-valued `Bool`/`Null` in `dest`:
/// NULL if either side is NULL, else the ordinary comparison result.
pub fn compile_cmp_value(b: &mut ProgramBuilder, dest: Register, lhs: Register, rhs: Register, op: CompareOp) {
    let true_lbl = b.allocate_label();
    let null_lbl = b.allocate_label();
    let end = b.allocate_label();
    b.emit_insn(Insn::IsNull { reg: lhs, target_pc: null_lbl });
    b.emit_insn(Insn::IsNull { reg: rhs, target_pc: null_lbl });
    b.emit_insn(Insn::Compare {
        lhs,
        rhs,
        op,
        target_pc: true_lbl,
        flags: CmpInsFlags::default(),
    });
    b.emit_insn(Insn::Bool { value: false, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(true_lbl);
    b.emit_insn(Insn::Bool { value: true, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(null_lbl);
    b.emit_insn(Insn::Null { dest });
    b.preassign_label_to_next_insn(end);
}

/// `IS`/`IS NOT`: always a definite boolean, `NULL IS NULL` is true.
pub(crate) fn compile_is_value(b: &mut ProgramBuilder, dest: Register, lhs: Register, rhs: Register, negate: bool) {
    let true_lbl = b.allocate_label();
    let end = b.allocate_label();
    b.emit_insn(Insn::Compare {
        lhs,
        rhs,
        op: CompareOp::Eq,
        target_pc: true_lbl,
        flags: CmpInsFlags { null_eq: true, jump_if_null: false },
    });
    b.emit_insn(Insn::Bool { value: negate, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(true_lbl);
    b.emit_insn(Insn::Bool { value: !negate, dest });
    b.preassign_label_to_next_insn(end);
}

/// Three-valued AND over two already-evaluated registers: false if either
/// is false, else NULL if either is NULL, else true.
pub fn compile_and_two_values(b: &mut ProgramBuilder, dest: Register, a: Register, c: Register) {
    let is_false = b.allocate_label();
    let is_null = b.allocate_label();
    let end = b.allocate_label();
    b.emit_insn(Insn::IfNot { reg: a, target_pc: is_false, jump_if_null: false });
    b.emit_insn(Insn::IfNot { reg: c, target_pc: is_false, jump_if_null: false });
    b.emit_insn(Insn::IsNull { reg: a, target_pc: is_null });
    b.emit_insn(Insn::IsNull { reg: c, target_pc: is_null });
    b.emit_insn(Insn::Bool { value: true, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(is_false);
    b.emit_insn(Insn::Bool { value: false, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(is_null);
    b.emit_insn(Insn::Null { dest });
    b.preassign_label_to_next_insn(end);
}

/// Three-valued OR, symmetric to `compile_and_two_values`.
pub fn compile_or_two_values(b: &mut ProgramBuilder, dest: Register, a: Register, c: Register) {
    let is_true = b.allocate_label();
    let is_null = b.allocate_label();
    let end = b.allocate_label();
    b.emit_insn(Insn::If { reg: a, target_pc: is_true, jump_if_null: false });
    b.emit_insn(Insn::If { reg: c, target_pc: is_true, jump_if_null: false });
    b.emit_insn(Insn::IsNull { reg: a, target_pc: is_null });
    b.emit_insn(Insn::IsNull { reg: c, target_pc: is_null });
    b.emit_insn(Insn::Bool { value: false, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(is_true);
    b.emit_insn(Insn::Bool { value: true, dest });
    b.emit_insn(Insn::Goto { target_pc: end });
    b.preassign_label_to_next_insn(is_null);
    b.emit_insn(Insn::Null { dest });
    b.preassign_label_to_next_insn(end);
}

fn compile_case(
    b: &mut ProgramBuilder,
    ctx: &mut ExprCtx,
    operand: Option<&Expr>,
    whens: &[(Expr, Expr)],
    else_: Option<&Expr>,
) -> Result<Register> {
    let dest = b.alloc_register();
    let operand_reg = operand.map(|e| compile_expr(b, ctx, e)).transpose()?;
    let end = b.allocate_label();
    for (when, then) in whens {
        let cond = match operand_reg {
            Some(op_reg) => {
                let when_reg = compile_expr(b, ctx, when)?;
                let eq = b.alloc_register();
                compile_cmp_value(b, eq, op_reg, when_reg, CompareOp::Eq);
                eq
            }
            None => compile_expr(b, ctx, when)?,
        };
        let next = b.allocate_label();
        b.emit_insn(Insn::IfNot { reg: cond, target_pc: next, jump_if_null: true });
        let then_reg = compile_expr(b, ctx, then)?;
        b.emit_insn(Insn::SCopy { src: then_reg, dest });
        b.emit_insn(Insn::Goto { target_pc: end });
        b.preassign_label_to_next_insn(next);
    }
    match else_ {
        Some(e) => {
            let r = compile_expr(b, ctx, e)?;
            b.emit_insn(Insn::SCopy { src: r, dest });
        }
        None => {
            b.emit_insn(Insn::Null { dest });
        }
    }
    b.preassign_label_to_next_insn(end);
    Ok(dest)
}

/// Compiles a literal expression outside of any scan (INSERT values, a
/// DEFAULT, a bound constant): no table bindings, parameters still bind.
pub fn compile_standalone(b: &mut ProgramBuilder, functions: &FunctionRegistry, params: &mut Vec<ParamSlot>, expr: &Expr) -> Result<Register> {
    let mut ctx = ExprCtx { tables: &[], functions, params };
    compile_expr(b, &mut ctx, expr)
}
