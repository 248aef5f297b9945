//! The register-based virtual machine (spec §6 Bytecode model): a built
//! `Program` plus the runtime state (registers, cursors, aggregate
//! accumulators) needed to step through it one row at a time, mirroring
//! the teacher's `vdbe::Program`/`vdbe::execute` split but scoped to the
//! synchronous opcode set in `insn`.

pub mod builder;
pub mod insn;
pub mod sorter;

pub use builder::ProgramBuilder;
pub use insn::{BranchOffset, CompareOp, CursorId, Insn, Register};
pub use sorter::Sorter;

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::function::{AggregateState, FunctionRegistry};
use crate::value::{Affinity, Value};
use crate::vtab::VTabCursor;

/// A finished, immutable instruction stream (spec §6). Cheap to clone
/// (`Rc`-wrapped by callers) so the same compiled statement can be run
/// repeatedly via `reset`.
pub struct Program {
    pub insns: Vec<Insn>,
    pub num_registers: usize,
    pub num_cursors: usize,
}

impl Program {
    /// Lists this program's opcodes with resolved operands (SPEC_FULL.md
    /// §3 supplement); a debugging aid only, no engine semantics depend
    /// on it.
    pub fn explain(&self) -> Vec<crate::translate::display::ExplainRow> {
        crate::translate::display::explain(self)
    }
}

/// What a cursor slot is currently bound to: a live virtual-table scan,
/// or an ephemeral sorter backing `ORDER BY`/`GROUP BY`.
enum Cursor {
    VTab(Box<dyn VTabCursor>),
    Sorter(Sorter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Row,
    Done,
}

/// Execution state for one run of a `Program`. `statement::Statement`
/// owns one of these per prepared statement and calls `reset` between
/// executions rather than rebuilding it.
pub struct Vm {
    program: Rc<Program>,
    functions: Rc<FunctionRegistry>,
    pc: usize,
    registers: Vec<Value>,
    cursors: Vec<Option<Cursor>>,
    agg_states: HashMap<Register, Box<dyn AggregateState>>,
    output_row: Vec<Value>,
    halted: bool,
}

impl Vm {
    pub fn new(program: Rc<Program>, functions: Rc<FunctionRegistry>) -> Self {
        let num_registers = program.num_registers.max(1);
        let num_cursors = program.num_cursors;
        Vm {
            program,
            functions,
            pc: 0,
            registers: vec![Value::Null; num_registers],
            cursors: (0..num_cursors).map(|_| None).collect(),
            agg_states: HashMap::new(),
            output_row: Vec::new(),
            halted: false,
        }
    }

    /// Rewind to the start of the program with a clean register file,
    /// ready for another `sqlite3_reset`-style re-run.
    pub fn reset(&mut self) {
        self.pc = 0;
        for r in self.registers.iter_mut() {
            *r = Value::Null;
        }
        self.cursors.clear();
        self.cursors
            .resize_with(self.program.num_cursors, || None);
        self.agg_states.clear();
        self.output_row.clear();
        self.halted = false;
    }

    /// Bind a value into a register ahead of execution (parameter binding,
    /// spec §6).
    pub fn set_register(&mut self, reg: Register, value: Value) {
        self.registers[reg] = value;
    }

    pub fn register(&self, reg: Register) -> &Value {
        &self.registers[reg]
    }

    /// The row produced by the most recent `StepResult::Row`.
    pub fn row(&self) -> &[Value] {
        &self.output_row
    }

    fn vtab_cursor_mut(&mut self, id: CursorId) -> Result<&mut Box<dyn VTabCursor>> {
        match self.cursors.get_mut(id).and_then(|c| c.as_mut()) {
            Some(Cursor::VTab(c)) => Ok(c),
            _ => Err(Error::internal(format!(
                "cursor {id} is not an open virtual-table cursor"
            ))),
        }
    }

    fn sorter_mut(&mut self, id: CursorId) -> Result<&mut Sorter> {
        match self.cursors.get_mut(id).and_then(|c| c.as_mut()) {
            Some(Cursor::Sorter(s)) => Ok(s),
            _ => Err(Error::internal(format!("cursor {id} is not an open sorter"))),
        }
    }

    /// Run until the next `ResultRow` or `Halt`. Call again after a `Row`
    /// to keep advancing through the remaining rows.
    pub fn step(&mut self) -> Result<StepResult> {
        if self.halted {
            return Ok(StepResult::Done);
        }
        loop {
            let cur_pc = self.pc;
            let program = Rc::clone(&self.program);
            let Some(insn) = program.insns.get(cur_pc) else {
                self.halted = true;
                return Ok(StepResult::Done);
            };
            match insn {
                Insn::Init { target_pc } => self.pc = target_pc.as_offset(),
                Insn::Goto { target_pc } => self.pc = target_pc.as_offset(),
                Insn::Halt { message } => {
                    self.halted = true;
                    if let Some(message) = message {
                        return Err(Error::runtime("Halt", cur_pc, message.clone()));
                    }
                    return Ok(StepResult::Done);
                }

                Insn::Null { dest } => {
                    self.registers[*dest] = Value::Null;
                    self.pc = cur_pc + 1;
                }
                Insn::Integer { value, dest } => {
                    self.registers[*dest] = Value::Integer(*value);
                    self.pc = cur_pc + 1;
                }
                Insn::Real { value, dest } => {
                    self.registers[*dest] = Value::Real(*value);
                    self.pc = cur_pc + 1;
                }
                Insn::String8 { value, dest } => {
                    self.registers[*dest] = Value::Text(value.clone());
                    self.pc = cur_pc + 1;
                }
                Insn::Blob { value, dest } => {
                    self.registers[*dest] = Value::Blob(value.clone());
                    self.pc = cur_pc + 1;
                }
                Insn::Bool { value, dest } => {
                    self.registers[*dest] = Value::Bool(*value);
                    self.pc = cur_pc + 1;
                }
                Insn::SCopy { src, dest } => {
                    self.registers[*dest] = self.registers[*src].clone();
                    self.pc = cur_pc + 1;
                }

                Insn::Add { lhs, rhs, dest } => {
                    let v = numeric_binop(&self.registers[*lhs], &self.registers[*rhs], i64::wrapping_add, |a, b| a + b)?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::Subtract { lhs, rhs, dest } => {
                    let v = numeric_binop(&self.registers[*lhs], &self.registers[*rhs], i64::wrapping_sub, |a, b| a - b)?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::Multiply { lhs, rhs, dest } => {
                    let v = numeric_binop(&self.registers[*lhs], &self.registers[*rhs], i64::wrapping_mul, |a, b| a * b)?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::Divide { lhs, rhs, dest } => {
                    let v = divide(&self.registers[*lhs], &self.registers[*rhs])?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::Remainder { lhs, rhs, dest } => {
                    let v = remainder(&self.registers[*lhs], &self.registers[*rhs])?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::Concat { lhs, rhs, dest } => {
                    let a = &self.registers[*lhs];
                    let b = &self.registers[*rhs];
                    self.registers[*dest] = if a.is_null() || b.is_null() {
                        Value::Null
                    } else {
                        Value::Text(format!("{a}{b}"))
                    };
                    self.pc = cur_pc + 1;
                }
                Insn::BitAnd { lhs, rhs, dest } => {
                    let v = int_binop(&self.registers[*lhs], &self.registers[*rhs], "&", |a, b| a & b)?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::BitOr { lhs, rhs, dest } => {
                    let v = int_binop(&self.registers[*lhs], &self.registers[*rhs], "|", |a, b| a | b)?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::ShiftLeft { lhs, rhs, dest } => {
                    let v = int_binop(&self.registers[*lhs], &self.registers[*rhs], "<<", |a, b| {
                        a.wrapping_shl(b as u32)
                    })?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::ShiftRight { lhs, rhs, dest } => {
                    let v = int_binop(&self.registers[*lhs], &self.registers[*rhs], ">>", |a, b| {
                        a.wrapping_shr(b as u32)
                    })?;
                    self.registers[*dest] = v;
                    self.pc = cur_pc + 1;
                }
                Insn::Negative { src, dest } => {
                    self.registers[*dest] = negate(&self.registers[*src])?;
                    self.pc = cur_pc + 1;
                }
                Insn::Not { src, dest } => {
                    let v = &self.registers[*src];
                    self.registers[*dest] = if v.is_null() {
                        Value::Null
                    } else {
                        Value::Bool(!v.is_true())
                    };
                    self.pc = cur_pc + 1;
                }
                Insn::BitNot { src, dest } => {
                    let v = &self.registers[*src];
                    self.registers[*dest] = if v.is_null() {
                        Value::Null
                    } else {
                        Value::Integer(!require_i64(v, "~")?)
                    };
                    self.pc = cur_pc + 1;
                }

                Insn::Compare { lhs, rhs, op, target_pc, flags } => {
                    let a = &self.registers[*lhs];
                    let b = &self.registers[*rhs];
                    let take = if a.is_null() || b.is_null() {
                        if flags.null_eq && *op == CompareOp::Eq && a.is_null() && b.is_null() {
                            true
                        } else {
                            flags.jump_if_null
                        }
                    } else {
                        let ord = a.compare(b, crate::value::Collation::Binary);
                        use std::cmp::Ordering::*;
                        match op {
                            CompareOp::Eq => ord == Equal,
                            CompareOp::Ne => ord != Equal,
                            CompareOp::Lt => ord == Less,
                            CompareOp::Le => ord != Greater,
                            CompareOp::Gt => ord == Greater,
                            CompareOp::Ge => ord != Less,
                        }
                    };
                    self.pc = if take { target_pc.as_offset() } else { cur_pc + 1 };
                }
                Insn::If { reg, target_pc, jump_if_null } => {
                    let v = &self.registers[*reg];
                    let take = if v.is_null() { *jump_if_null } else { v.is_true() };
                    self.pc = if take { target_pc.as_offset() } else { cur_pc + 1 };
                }
                Insn::IfNot { reg, target_pc, jump_if_null } => {
                    let v = &self.registers[*reg];
                    let take = if v.is_null() { *jump_if_null } else { !v.is_true() };
                    self.pc = if take { target_pc.as_offset() } else { cur_pc + 1 };
                }
                Insn::IsNull { reg, target_pc } => {
                    self.pc = if self.registers[*reg].is_null() {
                        target_pc.as_offset()
                    } else {
                        cur_pc + 1
                    };
                }
                Insn::NotNull { reg, target_pc } => {
                    self.pc = if !self.registers[*reg].is_null() {
                        target_pc.as_offset()
                    } else {
                        cur_pc + 1
                    };
                }
                Insn::DecrJumpZero { reg, target_pc } => {
                    let cur = match &self.registers[*reg] {
                        Value::Integer(i) => *i,
                        _ => 0,
                    };
                    let next = cur - 1;
                    self.registers[*reg] = Value::Integer(next);
                    self.pc = if next <= 0 { target_pc.as_offset() } else { cur_pc + 1 };
                }

                Insn::VOpen { cursor_id, table } => {
                    let cursor = table.open()?;
                    self.cursors[*cursor_id] = Some(Cursor::VTab(cursor));
                    self.pc = cur_pc + 1;
                }
                Insn::VFilter { cursor_id, idx_num, idx_str_reg, args_reg, arg_count, pc_if_empty } => {
                    let idx_str = match idx_str_reg {
                        Some(reg) => match &self.registers[*reg] {
                            Value::Text(s) => Some(s.clone()),
                            Value::Null => None,
                            other => {
                                return Err(Error::internal(format!(
                                    "VFilter idx_str register holds non-text value {other}"
                                )))
                            }
                        },
                        None => None,
                    };
                    let args: Vec<Value> = self.registers[*args_reg..*args_reg + *arg_count].to_vec();
                    let cursor = self.vtab_cursor_mut(*cursor_id)?;
                    cursor.filter(*idx_num, idx_str.as_deref(), &args)?;
                    self.pc = if cursor.eof() { pc_if_empty.as_offset() } else { cur_pc + 1 };
                }
                Insn::VColumn { cursor_id, column, dest } => {
                    let value = self.vtab_cursor_mut(*cursor_id)?.column(*column)?;
                    self.registers[*dest] = value;
                    self.pc = cur_pc + 1;
                }
                Insn::VRowid { cursor_id, dest } => {
                    let rowid = self.vtab_cursor_mut(*cursor_id)?.rowid()?;
                    self.registers[*dest] = Value::Integer(rowid);
                    self.pc = cur_pc + 1;
                }
                Insn::VNext { cursor_id, pc_if_next } => {
                    let cursor = self.vtab_cursor_mut(*cursor_id)?;
                    cursor.next()?;
                    self.pc = if cursor.eof() { cur_pc + 1 } else { pc_if_next.as_offset() };
                }
                Insn::VUpdate { table, start_reg, arg_count, conflict, dest_rowid } => {
                    let values: Vec<Value> = self.registers[*start_reg..*start_reg + *arg_count].to_vec();
                    let outcome = table.update(&values, *conflict)?;
                    if let Some(dest) = dest_rowid {
                        self.registers[*dest] = match outcome.rowid {
                            Some(rowid) => Value::Integer(rowid),
                            None => Value::Null,
                        };
                    }
                    self.pc = cur_pc + 1;
                }
                Insn::VBegin { table } => {
                    table.begin()?;
                    self.pc = cur_pc + 1;
                }
                Insn::VCommit { table } => {
                    table.commit()?;
                    self.pc = cur_pc + 1;
                }
                Insn::VRollback { table } => {
                    table.rollback()?;
                    self.pc = cur_pc + 1;
                }
                Insn::VSavepoint { table, index } => {
                    table.savepoint(*index)?;
                    self.pc = cur_pc + 1;
                }
                Insn::VRelease { table, index } => {
                    table.release(*index)?;
                    self.pc = cur_pc + 1;
                }
                Insn::VRollbackTo { table, index } => {
                    table.rollback_to(*index)?;
                    self.pc = cur_pc + 1;
                }

                Insn::Function { func_name, start_reg, arg_count, dest } => {
                    let args: Vec<Value> = self.registers[*start_reg..*start_reg + *arg_count].to_vec();
                    let f = self
                        .functions
                        .get_scalar(func_name)
                        .ok_or_else(|| Error::not_found(format!("no such function: {func_name}")))?;
                    self.registers[*dest] = f.call(&args)?;
                    self.pc = cur_pc + 1;
                }
                Insn::AggStep { func_name, acc_reg, start_reg, arg_count } => {
                    let args: Vec<Value> = self.registers[*start_reg..*start_reg + *arg_count].to_vec();
                    let state = self.agg_states.get_mut(acc_reg).ok_or_else(|| {
                        Error::internal(format!("AggStep on uninitialized accumulator for {func_name}"))
                    })?;
                    state.step(&args)?;
                    self.pc = cur_pc + 1;
                }
                Insn::AggReset { func_name, acc_reg } => {
                    let f = self
                        .functions
                        .get_aggregate(func_name)
                        .ok_or_else(|| Error::not_found(format!("no such aggregate: {func_name}")))?;
                    self.agg_states.insert(*acc_reg, f.init());
                    self.pc = cur_pc + 1;
                }
                Insn::AggFinal { func_name, acc_reg, dest } => {
                    let state = self.agg_states.get(acc_reg).ok_or_else(|| {
                        Error::internal(format!("AggFinal on uninitialized accumulator for {func_name}"))
                    })?;
                    self.registers[*dest] = state.finalize()?;
                    self.pc = cur_pc + 1;
                }

                Insn::SorterOpen { cursor_id, key_len, descending } => {
                    self.cursors[*cursor_id] = Some(Cursor::Sorter(Sorter::new(*key_len, descending.clone())));
                    self.pc = cur_pc + 1;
                }
                Insn::SorterInsert { cursor_id, start_reg, len } => {
                    let row: Vec<Value> = self.registers[*start_reg..*start_reg + *len].to_vec();
                    self.sorter_mut(*cursor_id)?.insert(row);
                    self.pc = cur_pc + 1;
                }
                Insn::SorterSort { cursor_id, pc_if_empty } => {
                    let sorter = self.sorter_mut(*cursor_id)?;
                    sorter.sort();
                    self.pc = if sorter.is_empty() { pc_if_empty.as_offset() } else { cur_pc + 1 };
                }
                Insn::SorterData { cursor_id, start_reg, len } => {
                    let sorter = self.sorter_mut(*cursor_id)?;
                    let row = sorter
                        .current()
                        .ok_or_else(|| Error::internal("SorterData called at eof"))?
                        .to_vec();
                    for (i, value) in row.into_iter().take(*len).enumerate() {
                        self.registers[*start_reg + i] = value;
                    }
                    self.pc = cur_pc + 1;
                }
                Insn::SorterNext { cursor_id, pc_if_next } => {
                    let sorter = self.sorter_mut(*cursor_id)?;
                    sorter.advance();
                    self.pc = if sorter.eof() { cur_pc + 1 } else { pc_if_next.as_offset() };
                }

                Insn::ResultRow { start_reg, count } => {
                    self.output_row = self.registers[*start_reg..*start_reg + *count].to_vec();
                    self.pc = cur_pc + 1;
                    return Ok(StepResult::Row);
                }
            }
        }
    }
}

fn require_i64(v: &Value, op: &str) -> Result<i64> {
    match v.apply_affinity(Affinity::Integer) {
        Value::Integer(i) => Ok(i),
        other => Err(Error::Type {
            message: format!("operator {op} requires an integer operand, got {other}"),
        }),
    }
}

fn to_numeric(v: &Value) -> Result<Value> {
    match v.apply_affinity(Affinity::Numeric) {
        Value::Integer(i) => Ok(Value::Integer(i)),
        Value::Real(f) => Ok(Value::Real(f)),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Type {
            message: format!("non-numeric operand: {other}"),
        }),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Real(f) => *f,
        _ => 0.0,
    }
}

fn numeric_binop(a: &Value, b: &Value, int_op: fn(i64, i64) -> i64, real_op: fn(f64, f64) -> f64) -> Result<Value> {
    let a = to_numeric(a)?;
    let b = to_numeric(b)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    Ok(match (&a, &b) {
        (Value::Integer(x), Value::Integer(y)) => Value::Integer(int_op(*x, *y)),
        _ => Value::Real(real_op(as_f64(&a), as_f64(&b))),
    })
}

fn int_binop(a: &Value, b: &Value, op: &str, int_op: fn(i64, i64) -> i64) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Integer(int_op(require_i64(a, op)?, require_i64(b, op)?)))
}

/// Integer division truncates toward zero; dividing by zero yields NULL
/// rather than erroring (matches the teacher's arithmetic opcodes).
fn divide(a: &Value, b: &Value) -> Result<Value> {
    let a = to_numeric(a)?;
    let b = to_numeric(b)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    Ok(match (&a, &b) {
        (Value::Integer(x), Value::Integer(y)) => {
            if *y == 0 {
                Value::Null
            } else {
                Value::Integer(x / y)
            }
        }
        _ => {
            let divisor = as_f64(&b);
            if divisor == 0.0 {
                Value::Null
            } else {
                Value::Real(as_f64(&a) / divisor)
            }
        }
    })
}

fn remainder(a: &Value, b: &Value) -> Result<Value> {
    let a = to_numeric(a)?;
    let b = to_numeric(b)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    Ok(match (&a, &b) {
        (Value::Integer(x), Value::Integer(y)) => {
            if *y == 0 {
                Value::Null
            } else {
                Value::Integer(x % y)
            }
        }
        _ => {
            let divisor = as_f64(&b);
            if divisor == 0.0 {
                Value::Null
            } else {
                Value::Real(as_f64(&a) % divisor)
            }
        }
    })
}

fn negate(v: &Value) -> Result<Value> {
    match to_numeric(v)? {
        Value::Integer(i) => Ok(Value::Integer(-i)),
        Value::Real(f) => Ok(Value::Real(-f)),
        Value::Null => Ok(Value::Null),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, PrimaryKeyColumn};
    use crate::value::Value;
    use crate::vtab::*;

    /// A trivial fixed-row virtual table, just enough to exercise VOpen/
    /// VFilter/VColumn/VNext/VRowid end to end without pulling in the
    /// full memory-table transaction machinery.
    struct FixedRows(Vec<(i64, Vec<Value>)>);

    struct FixedCursor {
        rows: Vec<(i64, Vec<Value>)>,
        pos: usize,
    }

    impl VTabCursor for FixedCursor {
        fn filter(&mut self, _idx_num: i32, _idx_str: Option<&str>, _args: &[Value]) -> Result<()> {
            self.pos = 0;
            Ok(())
        }
        fn next(&mut self) -> Result<()> {
            self.pos += 1;
            Ok(())
        }
        fn eof(&self) -> bool {
            self.pos >= self.rows.len()
        }
        fn column(&self, i: usize) -> Result<Value> {
            Ok(self.rows[self.pos].1[i].clone())
        }
        fn rowid(&self) -> Result<i64> {
            Ok(self.rows[self.pos].0)
        }
        fn seek_relative(&mut self, n: i64) -> Result<bool> {
            self.pos = (self.pos as i64 + n).max(0) as usize;
            Ok(!self.eof())
        }
        fn seek_to_rowid(&mut self, rowid: i64) -> Result<bool> {
            if let Some(p) = self.rows.iter().position(|(r, _)| *r == rowid) {
                self.pos = p;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    impl VTable for FixedRows {
        fn columns(&self) -> Vec<Column> {
            vec![]
        }
        fn primary_key(&self) -> Vec<PrimaryKeyColumn> {
            vec![]
        }
        fn open(&self) -> Result<Box<dyn VTabCursor>> {
            Ok(Box::new(FixedCursor { rows: self.0.clone(), pos: 0 }))
        }
        fn best_index(&self, _c: &[ConstraintInfo], _o: &[OrderByInfo]) -> IndexInfo {
            IndexInfo::default()
        }
        fn update(&self, _values: &[Value], _conflict: ConflictPolicy) -> Result<UpdateOutcome> {
            unimplemented!()
        }
        fn begin(&self) -> Result<()> {
            Ok(())
        }
        fn commit(&self) -> Result<()> {
            Ok(())
        }
        fn rollback(&self) -> Result<()> {
            Ok(())
        }
        fn savepoint(&self, _i: usize) -> Result<()> {
            Ok(())
        }
        fn release(&self, _i: usize) -> Result<()> {
            Ok(())
        }
        fn rollback_to(&self, _i: usize) -> Result<()> {
            Ok(())
        }
    }

    fn scan_program(table: Rc<dyn VTable>) -> Program {
        let mut b = ProgramBuilder::new();
        let cursor = b.alloc_cursor();
        let rowid_reg = b.alloc_register();
        let val_reg = b.alloc_register();
        let done = b.allocate_label();
        let loop_top = b.allocate_label();

        b.emit_insn(Insn::Init { target_pc: BranchOffset::Offset(1) });
        b.emit_insn(Insn::VOpen { cursor_id: cursor, table });
        b.emit_insn(Insn::VFilter {
            cursor_id: cursor,
            idx_num: 0,
            idx_str_reg: None,
            args_reg: 0,
            arg_count: 0,
            pc_if_empty: done,
        });
        b.preassign_label_to_next_insn(loop_top);
        b.emit_insn(Insn::VRowid { cursor_id: cursor, dest: rowid_reg });
        b.emit_insn(Insn::VColumn { cursor_id: cursor, column: 0, dest: val_reg });
        b.emit_insn(Insn::ResultRow { start_reg: rowid_reg, count: 2 });
        b.emit_insn(Insn::VNext { cursor_id: cursor, pc_if_next: loop_top });
        b.preassign_label_to_next_insn(done);
        b.emit_insn(Insn::Halt { message: None });
        b.build()
    }

    #[test]
    fn scans_all_rows_and_halts() {
        let table: Rc<dyn VTable> = Rc::new(FixedRows(vec![
            (1, vec![Value::Text("a".into())]),
            (2, vec![Value::Text("b".into())]),
        ]));
        let program = Rc::new(scan_program(table));
        let mut vm = Vm::new(program, Rc::new(FunctionRegistry::with_builtins()));

        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.row(), &[Value::Integer(1), Value::Text("a".into())]);
        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.row(), &[Value::Integer(2), Value::Text("b".into())]);
        assert_eq!(vm.step().unwrap(), StepResult::Done);
    }

    #[test]
    fn empty_table_jumps_straight_to_halt() {
        let table: Rc<dyn VTable> = Rc::new(FixedRows(vec![]));
        let program = Rc::new(scan_program(table));
        let mut vm = Vm::new(program, Rc::new(FunctionRegistry::with_builtins()));
        assert_eq!(vm.step().unwrap(), StepResult::Done);
    }

    #[test]
    fn arithmetic_promotes_to_real_on_mixed_operands() {
        let mut b = ProgramBuilder::new();
        let lhs = b.alloc_register();
        let rhs = b.alloc_register();
        let dest = b.alloc_register();
        b.emit_insn(Insn::Init { target_pc: BranchOffset::Offset(1) });
        b.emit_insn(Insn::Integer { value: 1, dest: lhs });
        b.emit_insn(Insn::Real { value: 2.5, dest: rhs });
        b.emit_insn(Insn::Add { lhs, rhs, dest });
        b.emit_insn(Insn::ResultRow { start_reg: dest, count: 1 });
        b.emit_insn(Insn::Halt { message: None });
        let mut vm = Vm::new(Rc::new(b.build()), Rc::new(FunctionRegistry::with_builtins()));
        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.row(), &[Value::Real(3.5)]);
    }

    #[test]
    fn divide_by_zero_is_null_not_error() {
        let mut b = ProgramBuilder::new();
        let lhs = b.alloc_register();
        let rhs = b.alloc_register();
        let dest = b.alloc_register();
        b.emit_insn(Insn::Init { target_pc: BranchOffset::Offset(1) });
        b.emit_insn(Insn::Integer { value: 7, dest: lhs });
        b.emit_insn(Insn::Integer { value: 0, dest: rhs });
        b.emit_insn(Insn::Divide { lhs, rhs, dest });
        b.emit_insn(Insn::ResultRow { start_reg: dest, count: 1 });
        b.emit_insn(Insn::Halt { message: None });
        let mut vm = Vm::new(Rc::new(b.build()), Rc::new(FunctionRegistry::with_builtins()));
        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.row(), &[Value::Null]);
    }

    #[test]
    fn limit_via_decr_jump_zero_stops_after_n_rows() {
        let table: Rc<dyn VTable> = Rc::new(FixedRows(vec![
            (1, vec![Value::Integer(10)]),
            (2, vec![Value::Integer(20)]),
            (3, vec![Value::Integer(30)]),
        ]));
        let mut b = ProgramBuilder::new();
        let cursor = b.alloc_cursor();
        let limit_reg = b.alloc_register();
        let val_reg = b.alloc_register();
        let done = b.allocate_label();
        let loop_top = b.allocate_label();

        b.emit_insn(Insn::Init { target_pc: BranchOffset::Offset(1) });
        b.emit_insn(Insn::Integer { value: 2, dest: limit_reg });
        b.emit_insn(Insn::VOpen { cursor_id: cursor, table });
        b.emit_insn(Insn::VFilter {
            cursor_id: cursor,
            idx_num: 0,
            idx_str_reg: None,
            args_reg: 0,
            arg_count: 0,
            pc_if_empty: done,
        });
        b.preassign_label_to_next_insn(loop_top);
        b.emit_insn(Insn::VColumn { cursor_id: cursor, column: 0, dest: val_reg });
        b.emit_insn(Insn::ResultRow { start_reg: val_reg, count: 1 });
        b.emit_insn(Insn::DecrJumpZero { reg: limit_reg, target_pc: done });
        b.emit_insn(Insn::VNext { cursor_id: cursor, pc_if_next: loop_top });
        b.preassign_label_to_next_insn(done);
        b.emit_insn(Insn::Halt { message: None });
        let mut vm = Vm::new(Rc::new(b.build()), Rc::new(FunctionRegistry::with_builtins()));

        let mut rows = Vec::new();
        loop {
            match vm.step().unwrap() {
                StepResult::Row => rows.push(vm.row().to_vec()),
                StepResult::Done => break,
            }
        }
        assert_eq!(rows, vec![vec![Value::Integer(10)], vec![Value::Integer(20)]]);
    }

    #[test]
    fn aggregate_sum_over_a_scan() {
        let table: Rc<dyn VTable> = Rc::new(FixedRows(vec![
            (1, vec![Value::Integer(1)]),
            (2, vec![Value::Integer(2)]),
            (3, vec![Value::Integer(3)]),
        ]));
        let mut b = ProgramBuilder::new();
        let cursor = b.alloc_cursor();
        let acc = b.alloc_register();
        let val_reg = b.alloc_register();
        let result = b.alloc_register();
        let done = b.allocate_label();
        let loop_top = b.allocate_label();

        b.emit_insn(Insn::Init { target_pc: BranchOffset::Offset(1) });
        b.emit_insn(Insn::AggReset { func_name: "sum".into(), acc_reg: acc });
        b.emit_insn(Insn::VOpen { cursor_id: cursor, table });
        b.emit_insn(Insn::VFilter {
            cursor_id: cursor,
            idx_num: 0,
            idx_str_reg: None,
            args_reg: 0,
            arg_count: 0,
            pc_if_empty: done,
        });
        b.preassign_label_to_next_insn(loop_top);
        b.emit_insn(Insn::VColumn { cursor_id: cursor, column: 0, dest: val_reg });
        b.emit_insn(Insn::AggStep { func_name: "sum".into(), acc_reg: acc, start_reg: val_reg, arg_count: 1 });
        b.emit_insn(Insn::VNext { cursor_id: cursor, pc_if_next: loop_top });
        b.preassign_label_to_next_insn(done);
        b.emit_insn(Insn::AggFinal { func_name: "sum".into(), acc_reg: acc, dest: result });
        b.emit_insn(Insn::ResultRow { start_reg: result, count: 1 });
        b.emit_insn(Insn::Halt { message: None });
        let mut vm = Vm::new(Rc::new(b.build()), Rc::new(FunctionRegistry::with_builtins()));

        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.row(), &[Value::Integer(6)]);
    }

    #[test]
    fn reset_allows_a_second_run() {
        let table: Rc<dyn VTable> = Rc::new(FixedRows(vec![(1, vec![Value::Text("a".into())])]));
        let program = Rc::new(scan_program(table));
        let mut vm = Vm::new(program, Rc::new(FunctionRegistry::with_builtins()));
        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.step().unwrap(), StepResult::Done);
        vm.reset();
        assert_eq!(vm.step().unwrap(), StepResult::Row);
        assert_eq!(vm.row(), &[Value::Integer(1), Value::Text("a".into())]);
    }
}
