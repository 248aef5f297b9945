//! Program construction with label backpatching (spec §6), mirroring the
//! teacher's `vdbe::builder::ProgramBuilder`: labels are allocated up
//! front, instructions referencing them are emitted freely in any order,
//! and `build()` walks the finished instruction stream rewriting every
//! `BranchOffset::Label` into a concrete `BranchOffset::Offset`.

use super::insn::{BranchOffset, CursorId, Insn, InsnReference, Register};
use super::Program;

pub struct ProgramBuilder {
    next_free_register: Register,
    next_free_cursor_id: CursorId,
    insns: Vec<Insn>,
    /// Labels queued to resolve to whatever instruction is emitted next.
    next_insn_labels: Vec<BranchOffset>,
    /// index = label number, value = resolved offset once known.
    label_to_resolved_offset: Vec<Option<InsnReference>>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            // register 0 is reserved (mirrors the teacher's convention of
            // never handing out register 0, which simplifies "no
            // destination" bookkeeping elsewhere).
            next_free_register: 1,
            next_free_cursor_id: 0,
            insns: Vec::new(),
            next_insn_labels: Vec::new(),
            label_to_resolved_offset: Vec::new(),
        }
    }

    pub fn alloc_register(&mut self) -> Register {
        let r = self.next_free_register;
        self.next_free_register += 1;
        r
    }

    pub fn alloc_registers(&mut self, n: usize) -> Register {
        let start = self.next_free_register;
        self.next_free_register += n;
        start
    }

    pub fn alloc_cursor(&mut self) -> CursorId {
        let c = self.next_free_cursor_id;
        self.next_free_cursor_id += 1;
        c
    }

    pub fn allocate_label(&mut self) -> BranchOffset {
        let n = self.label_to_resolved_offset.len();
        self.label_to_resolved_offset.push(None);
        BranchOffset::Label(n as u32)
    }

    pub fn offset(&self) -> BranchOffset {
        BranchOffset::Offset(self.insns.len())
    }

    pub fn emit_insn(&mut self, insn: Insn) -> InsnReference {
        let idx = self.insns.len();
        self.insns.push(insn);
        for label in self.next_insn_labels.drain(..) {
            Self::set_label(&mut self.label_to_resolved_offset, label, idx);
        }
        idx
    }

    /// The next instruction emitted becomes `label`'s resolved target.
    pub fn preassign_label_to_next_insn(&mut self, label: BranchOffset) {
        self.next_insn_labels.push(label);
    }

    /// Resolve `label` to an already-known offset (used when the target
    /// instruction has already been emitted, e.g. a backward jump).
    pub fn resolve_label(&mut self, label: BranchOffset, to_offset: InsnReference) {
        Self::set_label(&mut self.label_to_resolved_offset, label, to_offset);
    }

    fn set_label(table: &mut [Option<InsnReference>], label: BranchOffset, to: InsnReference) {
        let BranchOffset::Label(n) = label else {
            panic!("resolve target must be a Label");
        };
        table[n as usize] = Some(to);
    }

    pub fn build(mut self) -> Program {
        for insn in self.insns.iter_mut() {
            resolve_insn_labels(insn, &self.label_to_resolved_offset);
        }
        Program {
            insns: self.insns,
            num_registers: self.next_free_register,
            num_cursors: self.next_free_cursor_id,
        }
    }
}

fn resolve(bo: &mut BranchOffset, table: &[Option<InsnReference>]) {
    if let BranchOffset::Label(n) = *bo {
        let resolved = table[n as usize]
            .unwrap_or_else(|| panic!("label {n} was never resolved to an offset"));
        *bo = BranchOffset::Offset(resolved);
    }
}

fn resolve_insn_labels(insn: &mut Insn, table: &[Option<InsnReference>]) {
    match insn {
        Insn::Init { target_pc } | Insn::Goto { target_pc } => resolve(target_pc, table),
        Insn::Compare { target_pc, .. } => resolve(target_pc, table),
        Insn::If { target_pc, .. } | Insn::IfNot { target_pc, .. } => resolve(target_pc, table),
        Insn::IsNull { target_pc, .. } | Insn::NotNull { target_pc, .. } => {
            resolve(target_pc, table)
        }
        Insn::DecrJumpZero { target_pc, .. } => resolve(target_pc, table),
        Insn::VFilter { pc_if_empty, .. } => resolve(pc_if_empty, table),
        Insn::VNext { pc_if_next, .. } => resolve(pc_if_next, table),
        Insn::SorterSort { pc_if_empty, .. } => resolve(pc_if_empty, table),
        Insn::SorterNext { pc_if_next, .. } => resolve(pc_if_next, table),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::insn::CompareOp;

    #[test]
    fn forward_label_resolves_to_emitted_offset() {
        let mut b = ProgramBuilder::new();
        let done = b.allocate_label();
        b.emit_insn(Insn::Compare {
            lhs: 1,
            rhs: 2,
            op: CompareOp::Eq,
            target_pc: done,
            flags: Default::default(),
        });
        b.emit_insn(Insn::Integer { value: 1, dest: 3 });
        b.preassign_label_to_next_insn(done);
        b.emit_insn(Insn::Halt { message: None });
        let program = b.build();
        let Insn::Compare { target_pc, .. } = &program.insns[0] else {
            panic!("expected Compare")
        };
        assert_eq!(*target_pc, BranchOffset::Offset(2));
    }

    #[test]
    #[should_panic(expected = "never resolved")]
    fn unresolved_label_panics_on_build() {
        let mut b = ProgramBuilder::new();
        let label = b.allocate_label();
        b.emit_insn(Insn::Goto { target_pc: label });
        b.build();
    }
}
