//! The VDBE opcode catalogue (spec §6 Bytecode model). A cut-down,
//! synchronous sibling of the teacher's `vdbe::insn::Insn`: the same
//! register/cursor/label shape, without the async Open*Async/Open*Await
//! pairs a real on-disk B-tree needs (this engine's only cursor source is
//! the in-memory virtual table, which never suspends).

use std::rc::Rc;

use crate::value::Value;
use crate::vtab::{ConflictPolicy, VTable};

pub type CursorId = usize;
pub type Register = usize;
pub type InsnReference = usize;

/// A jump target: either unresolved (`Label`, assigned by
/// `ProgramBuilder::allocate_label`) or resolved to a concrete instruction
/// index (`Offset`). All `Label`s must be resolved before `build()`
/// produces a `Program` (spec §6 backpatching).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOffset {
    Label(u32),
    Offset(InsnReference),
}

impl BranchOffset {
    pub fn as_offset(&self) -> InsnReference {
        match self {
            BranchOffset::Offset(o) => *o,
            BranchOffset::Label(l) => panic!("unresolved label {l}"),
        }
    }
}

/// Flags controlling NULL handling in comparison jumps, mirroring the
/// teacher's `CmpInsFlags` bitset.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmpInsFlags {
    /// Treat `NULL = NULL` as true instead of unknown (used for `IS`).
    pub null_eq: bool,
    /// Take the jump when either operand is NULL instead of falling
    /// through (used to short-circuit `AND` chains).
    pub jump_if_null: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One VDBE instruction. Grouped loosely the way the teacher's `Insn`
/// enum is: register/constant loads, arithmetic, comparison jumps,
/// cursor control (here: virtual-table only), aggregation, sorting,
/// and the handful of control-flow opcodes every program needs.
///
/// No `Debug` derive: the virtual-table opcodes carry `Rc<dyn VTable>`,
/// and the trait doesn't require `Debug` of implementers.
#[derive(Clone)]
pub enum Insn {
    /// Jump to `target_pc`; every program starts with one so the
    /// subroutine/declaration prologue can precede the main body.
    Init { target_pc: BranchOffset },
    Goto { target_pc: BranchOffset },
    /// Unconditional end of program; `is_error` marks a RAISE-style halt.
    Halt { message: Option<String> },

    Null { dest: Register },
    Integer { value: i64, dest: Register },
    Real { value: f64, dest: Register },
    String8 { value: String, dest: Register },
    Blob { value: Vec<u8>, dest: Register },
    Bool { value: bool, dest: Register },
    /// Shallow-copy one register to another.
    SCopy { src: Register, dest: Register },

    Add { lhs: Register, rhs: Register, dest: Register },
    Subtract { lhs: Register, rhs: Register, dest: Register },
    Multiply { lhs: Register, rhs: Register, dest: Register },
    Divide { lhs: Register, rhs: Register, dest: Register },
    Remainder { lhs: Register, rhs: Register, dest: Register },
    Concat { lhs: Register, rhs: Register, dest: Register },
    BitAnd { lhs: Register, rhs: Register, dest: Register },
    BitOr { lhs: Register, rhs: Register, dest: Register },
    ShiftLeft { lhs: Register, rhs: Register, dest: Register },
    ShiftRight { lhs: Register, rhs: Register, dest: Register },
    Negative { src: Register, dest: Register },
    Not { src: Register, dest: Register },
    BitNot { src: Register, dest: Register },

    /// Jump to `target_pc` if `lhs OP rhs` holds, per the three-valued
    /// semantics `flags` selects; falls through otherwise.
    Compare {
        lhs: Register,
        rhs: Register,
        op: CompareOp,
        target_pc: BranchOffset,
        flags: CmpInsFlags,
    },
    /// Jump if `reg` is SQL-true (`Value::is_true`).
    If { reg: Register, target_pc: BranchOffset, jump_if_null: bool },
    /// Jump if `reg` is SQL-false or NULL (unless `jump_if_null` is false).
    IfNot { reg: Register, target_pc: BranchOffset, jump_if_null: bool },
    IsNull { reg: Register, target_pc: BranchOffset },
    NotNull { reg: Register, target_pc: BranchOffset },
    /// Decrement `reg`; jump to `target_pc` once it reaches zero. Drives
    /// `LIMIT`.
    DecrJumpZero { reg: Register, target_pc: BranchOffset },

    /// Open a cursor over a virtual table.
    VOpen { cursor_id: CursorId, table: Rc<dyn VTable> },
    /// Position the cursor via `best_index`'s plan; `idx_str_reg` points
    /// at a register holding the idx_str (or `None` if best_index gave
    /// none), `args_reg` is the first of `arg_count` consecutive filter
    /// argument registers.
    VFilter {
        cursor_id: CursorId,
        idx_num: i32,
        idx_str_reg: Option<Register>,
        args_reg: Register,
        arg_count: usize,
        pc_if_empty: BranchOffset,
    },
    VColumn { cursor_id: CursorId, column: usize, dest: Register },
    VRowid { cursor_id: CursorId, dest: Register },
    VNext { cursor_id: CursorId, pc_if_next: BranchOffset },
    /// `start_reg` is the rowid slot, `start_reg+1..` the column values,
    /// per the update calling convention (spec §4.3). Targets the table
    /// directly rather than a cursor: writes have no cursor position.
    VUpdate {
        table: Rc<dyn VTable>,
        start_reg: Register,
        arg_count: usize,
        conflict: ConflictPolicy,
        dest_rowid: Option<Register>,
    },
    VBegin { table: Rc<dyn VTable> },
    VCommit { table: Rc<dyn VTable> },
    VRollback { table: Rc<dyn VTable> },
    VSavepoint { table: Rc<dyn VTable>, index: usize },
    VRelease { table: Rc<dyn VTable>, index: usize },
    VRollbackTo { table: Rc<dyn VTable>, index: usize },

    /// Call a scalar function on `reg(start_reg)..reg(start_reg+arg_count)`.
    Function {
        func_name: String,
        start_reg: Register,
        arg_count: usize,
        dest: Register,
    },
    /// Feed one row's worth of arguments into the aggregate accumulator
    /// at `acc_reg` (allocated once per group by `AggReset`).
    AggStep {
        func_name: String,
        acc_reg: Register,
        start_reg: Register,
        arg_count: usize,
    },
    /// Replace `acc_reg`'s in-progress state with a fresh accumulator,
    /// emitted once per `GROUP BY` bucket (including the implicit single
    /// bucket when there's no `GROUP BY`).
    AggReset { func_name: String, acc_reg: Register },
    AggFinal { func_name: String, acc_reg: Register, dest: Register },

    /// Open an ephemeral sorter keyed by `key_len` leading fields of each
    /// inserted row; `descending[i]` flips that field's order. Backs both
    /// `ORDER BY` and `GROUP BY` (grouping sorts by the group-by
    /// expressions first, then scans runs of equal keys).
    SorterOpen { cursor_id: CursorId, key_len: usize, descending: Vec<bool> },
    SorterInsert { cursor_id: CursorId, start_reg: Register, len: usize },
    SorterSort { cursor_id: CursorId, pc_if_empty: BranchOffset },
    SorterData { cursor_id: CursorId, start_reg: Register, len: usize },
    SorterNext { cursor_id: CursorId, pc_if_next: BranchOffset },

    /// Emit `reg(start_reg)..reg(start_reg+count)` as one output row.
    ResultRow { start_reg: Register, count: usize },
}
