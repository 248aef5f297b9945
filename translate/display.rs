//! `EXPLAIN` support (SPEC_FULL.md §3 supplement): lists a compiled
//! program's opcodes with resolved operands, in the teacher's
//! `translate/display.rs` `p1..p5` column style. Purely a debugging aid;
//! no engine semantics depend on it.

use crate::vdbe::{BranchOffset, Insn, Program};

#[derive(Debug, Clone)]
pub struct ExplainRow {
    pub addr: usize,
    pub opcode: &'static str,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
    pub p4: String,
    pub comment: String,
}

fn offset_p2(bo: &BranchOffset) -> i64 {
    match bo {
        BranchOffset::Offset(o) => *o as i64,
        BranchOffset::Label(n) => -(*n as i64 + 1),
    }
}

/// Renders `program`'s instruction stream as one row per opcode. Labels
/// that somehow survived to this point (a program built without calling
/// `build()`) show up as negative `p2` values rather than panicking.
pub fn explain(program: &Program) -> Vec<ExplainRow> {
    program
        .insns
        .iter()
        .enumerate()
        .map(|(addr, insn)| explain_one(addr, insn))
        .collect()
}

fn explain_one(addr: usize, insn: &Insn) -> ExplainRow {
    let row = |opcode, p1, p2, p3, p4: String, comment: String| ExplainRow {
        addr,
        opcode,
        p1,
        p2,
        p3,
        p4,
        comment,
    };
    match insn {
        Insn::Init { target_pc } => row("Init", 0, offset_p2(target_pc), 0, String::new(), "jump to program start".into()),
        Insn::Goto { target_pc } => row("Goto", 0, offset_p2(target_pc), 0, String::new(), String::new()),
        Insn::Halt { message } => row("Halt", 0, 0, 0, message.clone().unwrap_or_default(), String::new()),
        Insn::Null { dest } => row("Null", 0, *dest as i64, 0, String::new(), String::new()),
        Insn::Integer { value, dest } => row("Integer", *value, *dest as i64, 0, String::new(), String::new()),
        Insn::Real { value, dest } => row("Real", 0, *dest as i64, 0, value.to_string(), String::new()),
        Insn::String8 { value, dest } => row("String8", 0, *dest as i64, 0, value.clone(), String::new()),
        Insn::Blob { value, dest } => row("Blob", value.len() as i64, *dest as i64, 0, String::new(), String::new()),
        Insn::Bool { value, dest } => row("Bool", i64::from(*value), *dest as i64, 0, String::new(), String::new()),
        Insn::SCopy { src, dest } => row("SCopy", *src as i64, *dest as i64, 0, String::new(), String::new()),
        Insn::Add { lhs, rhs, dest } => row("Add", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::Subtract { lhs, rhs, dest } => row("Subtract", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::Multiply { lhs, rhs, dest } => row("Multiply", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::Divide { lhs, rhs, dest } => row("Divide", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::Remainder { lhs, rhs, dest } => row("Remainder", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::Concat { lhs, rhs, dest } => row("Concat", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::BitAnd { lhs, rhs, dest } => row("BitAnd", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::BitOr { lhs, rhs, dest } => row("BitOr", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::ShiftLeft { lhs, rhs, dest } => row("ShiftLeft", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::ShiftRight { lhs, rhs, dest } => row("ShiftRight", *lhs as i64, *rhs as i64, *dest as i64, String::new(), String::new()),
        Insn::Negative { src, dest } => row("Negative", *src as i64, *dest as i64, 0, String::new(), String::new()),
        Insn::Not { src, dest } => row("Not", *src as i64, *dest as i64, 0, String::new(), String::new()),
        Insn::BitNot { src, dest } => row("BitNot", *src as i64, *dest as i64, 0, String::new(), String::new()),
        Insn::Compare { lhs, rhs, op, target_pc, flags } => row(
            "Compare",
            *lhs as i64,
            offset_p2(target_pc),
            *rhs as i64,
            format!("{op:?}"),
            format!("null_eq={} jump_if_null={}", flags.null_eq, flags.jump_if_null),
        ),
        Insn::If { reg, target_pc, jump_if_null } => {
            row("If", *reg as i64, offset_p2(target_pc), i64::from(*jump_if_null), String::new(), String::new())
        }
        Insn::IfNot { reg, target_pc, jump_if_null } => {
            row("IfNot", *reg as i64, offset_p2(target_pc), i64::from(*jump_if_null), String::new(), String::new())
        }
        Insn::IsNull { reg, target_pc } => row("IsNull", *reg as i64, offset_p2(target_pc), 0, String::new(), String::new()),
        Insn::NotNull { reg, target_pc } => row("NotNull", *reg as i64, offset_p2(target_pc), 0, String::new(), String::new()),
        Insn::DecrJumpZero { reg, target_pc } => {
            row("DecrJumpZero", *reg as i64, offset_p2(target_pc), 0, String::new(), String::new())
        }
        Insn::VOpen { cursor_id, .. } => row("VOpen", *cursor_id as i64, 0, 0, String::new(), String::new()),
        Insn::VFilter { cursor_id, idx_num, args_reg, arg_count, pc_if_empty, .. } => row(
            "VFilter",
            *cursor_id as i64,
            offset_p2(pc_if_empty),
            *args_reg as i64,
            format!("idx_num={idx_num} arg_count={arg_count}"),
            String::new(),
        ),
        Insn::VColumn { cursor_id, column, dest } => {
            row("VColumn", *cursor_id as i64, *column as i64, *dest as i64, String::new(), String::new())
        }
        Insn::VRowid { cursor_id, dest } => row("VRowid", *cursor_id as i64, *dest as i64, 0, String::new(), String::new()),
        Insn::VNext { cursor_id, pc_if_next } => row("VNext", *cursor_id as i64, offset_p2(pc_if_next), 0, String::new(), String::new()),
        Insn::VUpdate { start_reg, arg_count, conflict, dest_rowid, .. } => row(
            "VUpdate",
            *start_reg as i64,
            *arg_count as i64,
            dest_rowid.map(|r| r as i64).unwrap_or(-1),
            format!("{conflict:?}"),
            String::new(),
        ),
        Insn::VBegin { .. } => row("VBegin", 0, 0, 0, String::new(), String::new()),
        Insn::VCommit { .. } => row("VCommit", 0, 0, 0, String::new(), String::new()),
        Insn::VRollback { .. } => row("VRollback", 0, 0, 0, String::new(), String::new()),
        Insn::VSavepoint { index, .. } => row("VSavepoint", *index as i64, 0, 0, String::new(), String::new()),
        Insn::VRelease { index, .. } => row("VRelease", *index as i64, 0, 0, String::new(), String::new()),
        Insn::VRollbackTo { index, .. } => row("VRollbackTo", *index as i64, 0, 0, String::new(), String::new()),
        Insn::Function { func_name, start_reg, arg_count, dest } => {
            row("Function", *start_reg as i64, *arg_count as i64, *dest as i64, func_name.clone(), String::new())
        }
        Insn::AggStep { func_name, acc_reg, start_reg, arg_count } => row(
            "AggStep",
            *acc_reg as i64,
            *start_reg as i64,
            *arg_count as i64,
            func_name.clone(),
            String::new(),
        ),
        Insn::AggReset { func_name, acc_reg } => row("AggReset", *acc_reg as i64, 0, 0, func_name.clone(), String::new()),
        Insn::AggFinal { func_name, acc_reg, dest } => {
            row("AggFinal", *acc_reg as i64, *dest as i64, 0, func_name.clone(), String::new())
        }
        Insn::SorterOpen { cursor_id, key_len, .. } => row("SorterOpen", *cursor_id as i64, *key_len as i64, 0, String::new(), String::new()),
        Insn::SorterInsert { cursor_id, start_reg, len } => {
            row("SorterInsert", *cursor_id as i64, *start_reg as i64, *len as i64, String::new(), String::new())
        }
        Insn::SorterSort { cursor_id, pc_if_empty } => {
            row("SorterSort", *cursor_id as i64, offset_p2(pc_if_empty), 0, String::new(), String::new())
        }
        Insn::SorterData { cursor_id, start_reg, len } => {
            row("SorterData", *cursor_id as i64, *start_reg as i64, *len as i64, String::new(), String::new())
        }
        Insn::SorterNext { cursor_id, pc_if_next } => {
            row("SorterNext", *cursor_id as i64, offset_p2(pc_if_next), 0, String::new(), String::new())
        }
        Insn::ResultRow { start_reg, count } => row("ResultRow", *start_reg as i64, *count as i64, 0, String::new(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::builder::ProgramBuilder;

    #[test]
    fn explain_lists_one_row_per_instruction() {
        let mut b = ProgramBuilder::new();
        let start = b.allocate_label();
        b.emit_insn(Insn::Init { target_pc: start });
        b.preassign_label_to_next_insn(start);
        b.emit_insn(Insn::Integer { value: 7, dest: 1 });
        b.emit_insn(Insn::Halt { message: None });
        let program = b.build();
        let rows = explain(&program);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].opcode, "Init");
        assert_eq!(rows[1].opcode, "Integer");
        assert_eq!(rows[1].p1, 7);
        assert_eq!(rows[2].opcode, "Halt");
    }
}
