//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` encodes opcodes and operands into raw bytes, manages labels
//! (any number of forward jump sites per label, patched when the label is
//! marked; backward jumps resolve immediately), interns reference-table
//! entries, tracks stack depth, and records source lines for the debug table.

use crate::{
    error::{CompileError, ErrorKind, Loc},
    registry::{Sort, StructId},
    typed::{DynCall, FuncRefData},
};

use super::{
    code::{Code, ExceptionEntry, FieldRef, LineEntry, MethodRef, PoolConst},
    op::{Opcode, sort_to_byte},
};

/// A branch target; create with [`CodeBuilder::new_label`], jump to it any
/// number of times, and mark it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelState {
    /// Offsets of jump instructions waiting for this label.
    sites: Vec<usize>,
    /// Bytecode offset once marked.
    target: Option<usize>,
}

#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    pool: Vec<PoolConst>,
    method_refs: Vec<MethodRef>,
    field_refs: Vec<FieldRef>,
    dyn_refs: Vec<DynCall>,
    funcref_refs: Vec<FuncRefData>,
    struct_refs: Vec<StructId>,
    labels: Vec<LabelState>,
    line_table: Vec<LineEntry>,
    exception_table: Vec<ExceptionEntry>,
    /// Line to record before the next emitted instruction, when debug info
    /// is enabled.
    pending_line: Option<u32>,
    debug_info: bool,
    current_stack: u16,
    max_stack: u16,
    /// Location used for limit diagnostics.
    loc: Loc,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(debug_info: bool) -> Self {
        Self {
            debug_info,
            ..Self::default()
        }
    }

    /// Sets the source location for limit diagnostics and, when debug info
    /// is on, the line recorded before the next instruction.
    pub fn set_location(&mut self, loc: Loc) {
        self.loc = loc;
        if self.debug_info {
            self.pending_line = Some(loc.line);
        }
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        self.current_stack
    }

    /// Sets the stack depth to an absolute value at a merge point.
    pub fn set_stack_depth(&mut self, depth: u16) {
        self.current_stack = depth;
        self.max_stack = self.max_stack.max(depth);
    }

    fn start_instruction(&mut self) {
        if let Some(line) = self.pending_line.take() {
            let offset = u32::try_from(self.bytecode.len()).expect("bytecode length exceeds u32");
            if self.line_table.last().is_none_or(|entry| entry.line != line) {
                self.line_table.push(LineEntry { offset, line });
            }
        }
    }

    fn adjust(&mut self, delta: i16) {
        let depth = i32::from(self.current_stack) + i32::from(delta);
        debug_assert!(depth >= 0, "stack depth went negative: {depth}");
        self.current_stack = u16::try_from(depth.max(0)).unwrap_or(u16::MAX);
        self.max_stack = self.max_stack.max(self.current_stack);
    }

    /// Emits a no-operand instruction with an explicit stack effect.
    pub fn emit(&mut self, op: Opcode, effect: i16) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.adjust(effect);
    }

    /// Emits a sort-parameterized instruction.
    pub fn emit_sort(&mut self, op: Opcode, sort: Sort, effect: i16) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.push(sort_to_byte(sort));
        self.adjust(effect);
    }

    pub fn emit_small_int(&mut self, value: i8) {
        self.start_instruction();
        self.bytecode.push(Opcode::LoadSmallInt as u8);
        self.bytecode.push(value.to_ne_bytes()[0]);
        self.adjust(1);
    }

    fn emit_u16(&mut self, op: Opcode, operand: u16, effect: i16) {
        self.start_instruction();
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        self.adjust(effect);
    }

    pub fn emit_load_slot(&mut self, slot: u16) {
        self.emit_u16(Opcode::LoadSlot, slot, 1);
    }

    pub fn emit_store_slot(&mut self, slot: u16) {
        self.emit_u16(Opcode::StoreSlot, slot, -1);
    }

    pub fn emit_coerce(&mut self, from: Sort, to: Sort) {
        self.start_instruction();
        self.bytecode.push(Opcode::Coerce as u8);
        self.bytecode.push(sort_to_byte(from));
        self.bytecode.push(sort_to_byte(to));
    }

    /// Emits `Cmp`: pops two operands, pushes a bool.
    pub fn emit_cmp(&mut self, op_byte: u8, sort: Sort) {
        self.start_instruction();
        self.bytecode.push(Opcode::Cmp as u8);
        self.bytecode.push(op_byte);
        self.bytecode.push(sort_to_byte(sort));
        self.adjust(-1);
    }

    pub fn emit_load_const(&mut self, value: PoolConst) {
        let idx = self.add_const(value);
        self.emit_u16(Opcode::LoadConst, idx, 1);
    }

    pub fn emit_invoke(&mut self, reference: MethodRef, argc: u8) {
        let op = if reference.is_static {
            Opcode::InvokeStatic
        } else {
            Opcode::InvokeVirtual
        };
        let pops = i16::from(argc) + i16::from(!reference.is_static);
        let pushes = i16::from(!reference.returns_void);
        let idx = intern(&mut self.method_refs, reference, self.loc).expect("method table bounded by source size");
        self.emit_u16(op, idx, pushes - pops);
    }

    pub fn emit_new_instance(&mut self, reference: MethodRef, argc: u8) {
        let idx = intern(&mut self.method_refs, reference, self.loc).expect("method table bounded by source size");
        self.emit_u16(Opcode::NewInstance, idx, 1 - i16::from(argc));
    }

    pub fn emit_get_field(&mut self, reference: FieldRef) {
        let (op, effect) = if reference.is_static {
            (Opcode::GetStatic, 1)
        } else {
            (Opcode::GetField, 0)
        };
        let idx = intern(&mut self.field_refs, reference, self.loc).expect("field table bounded by source size");
        self.emit_u16(op, idx, effect);
    }

    pub fn emit_put_field(&mut self, reference: FieldRef) {
        let idx = intern(&mut self.field_refs, reference, self.loc).expect("field table bounded by source size");
        self.emit_u16(Opcode::PutField, idx, -2);
    }

    /// Emits a dynamic call site. `pops` counts every consumed operand
    /// (receiver included); store-shaped operations push nothing.
    pub fn emit_invoke_dynamic(&mut self, call: DynCall, pops: u8, pushes: bool) {
        let idx = intern(&mut self.dyn_refs, call, self.loc).expect("dyn table bounded by source size");
        self.emit_u16(Opcode::InvokeDynamic, idx, i16::from(pushes) - i16::from(pops));
    }

    pub fn emit_build_funcref(&mut self, data: FuncRefData, captures: u8) {
        self.start_instruction();
        let idx = intern(&mut self.funcref_refs, data, self.loc).expect("funcref table bounded by source size");
        self.bytecode.push(Opcode::BuildFuncRef as u8);
        self.bytecode.extend_from_slice(&idx.to_le_bytes());
        self.bytecode.push(captures);
        self.adjust(1 - i16::from(captures));
    }

    pub fn emit_call_local(&mut self, id: u16, argc: u8, returns_void: bool) {
        self.start_instruction();
        self.bytecode.push(Opcode::CallLocal as u8);
        self.bytecode.extend_from_slice(&id.to_le_bytes());
        self.bytecode.push(argc);
        self.adjust(i16::from(!returns_void) - i16::from(argc));
    }

    pub fn emit_build_list(&mut self, count: u16) {
        self.emit_u16(Opcode::BuildList, count, 1 - count.cast_signed());
    }

    pub fn emit_build_map(&mut self, pairs: u16) {
        self.emit_u16(Opcode::BuildMap, pairs, 1 - 2 * pairs.cast_signed());
    }

    pub fn emit_new_array(&mut self, elem: Sort, dims: u8) {
        self.start_instruction();
        self.bytecode.push(Opcode::NewArray as u8);
        self.bytecode.push(sort_to_byte(elem));
        self.bytecode.push(dims);
        self.adjust(1 - i16::from(dims));
    }

    pub fn emit_instance_of(&mut self, target: StructId) {
        let idx = intern(&mut self.struct_refs, target, self.loc).expect("struct table bounded by source size");
        self.emit_u16(Opcode::InstanceOf, idx, 0);
    }

    pub fn emit_loop_tick(&mut self, slot: u16, cost: u16) {
        self.start_instruction();
        self.bytecode.push(Opcode::LoopTick as u8);
        self.bytecode.extend_from_slice(&slot.to_le_bytes());
        self.bytecode.extend_from_slice(&cost.to_le_bytes());
    }

    #[must_use]
    pub fn add_const(&mut self, value: PoolConst) -> u16 {
        if let Some(found) = self.pool.iter().position(|existing| existing == &value) {
            return u16::try_from(found).expect("pool position fits u16");
        }
        let idx = self.pool.len();
        self.pool.push(value);
        u16::try_from(idx).expect("constant pool exceeds u16 range; script too large")
    }

    // --- labels ---

    #[must_use]
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len());
        self.labels.push(LabelState::default());
        label
    }

    /// Emits a jump to `label`; forward jumps are patched at `mark`.
    pub fn jump(&mut self, op: Opcode, label: Label) {
        debug_assert!(matches!(op, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse));
        self.start_instruction();
        let site = self.bytecode.len();
        let effect = if op == Opcode::Jump { 0 } else { -1 };
        if let Some(target) = self.labels[label.0].target {
            let offset = jump_offset(target, site);
            self.bytecode.push(op as u8);
            self.bytecode.extend_from_slice(&offset.to_le_bytes());
        } else {
            self.bytecode.push(op as u8);
            self.bytecode.extend_from_slice(&0i16.to_le_bytes());
            self.labels[label.0].sites.push(site);
        }
        self.adjust(effect);
    }

    /// Marks the label at the current offset and patches pending sites.
    pub fn mark(&mut self, label: Label) {
        let target = self.bytecode.len();
        let state = &mut self.labels[label.0];
        debug_assert!(state.target.is_none(), "label marked twice");
        state.target = Some(target);
        for site in std::mem::take(&mut state.sites) {
            let offset = jump_offset(target, site);
            let bytes = offset.to_le_bytes();
            self.bytecode[site + 1] = bytes[0];
            self.bytecode[site + 2] = bytes[1];
        }
    }

    /// True when at least one jump site targets this label.
    #[must_use]
    pub fn label_used(&self, label: Label) -> bool {
        !self.labels[label.0].sites.is_empty() || self.labels[label.0].target.is_some()
    }

    pub fn add_exception_entry(&mut self, entry: ExceptionEntry) {
        self.exception_table.push(entry);
    }

    /// Consumes the builder into a [`Code`] body.
    ///
    /// Fails with a Limit error if any forward jump was never resolved in
    /// range; unresolved labels indicate an emitter bug and panic.
    pub fn build(self, max_slots: u16) -> Result<Code, CompileError> {
        for state in &self.labels {
            assert!(
                state.sites.is_empty(),
                "unmarked label with pending jump sites (emitter bug)"
            );
        }
        Ok(Code {
            bytecode: self.bytecode,
            pool: self.pool,
            method_refs: self.method_refs,
            field_refs: self.field_refs,
            dyn_refs: self.dyn_refs,
            funcref_refs: self.funcref_refs,
            struct_refs: self.struct_refs,
            line_table: self.line_table,
            exception_table: self.exception_table,
            max_slots,
            max_stack: self.max_stack,
        })
    }
}

/// Offset relative to the end of the 3-byte jump instruction.
fn jump_offset(target: usize, site: usize) -> i16 {
    let raw = i64::try_from(target).expect("offset fits i64") - i64::try_from(site + 3).expect("offset fits i64");
    i16::try_from(raw).expect("jump offset exceeds i16 range; method too large to emit")
}

fn intern<T: PartialEq>(table: &mut Vec<T>, entry: T, loc: Loc) -> Result<u16, CompileError> {
    if let Some(found) = table.iter().position(|existing| existing == &entry) {
        return Ok(u16::try_from(found).expect("table position fits u16"));
    }
    let idx = table.len();
    table.push(entry);
    u16::try_from(idx).map_err(|_| CompileError::new(ErrorKind::Limit, "too many member references.", loc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_jump_patching() {
        let mut b = CodeBuilder::new(false);
        let end = b.new_label();
        b.emit(Opcode::LoadTrue, 1);
        b.jump(Opcode::JumpIfFalse, end);
        b.emit(Opcode::LoadNull, 1);
        b.emit(Opcode::Return, -1);
        b.mark(end);
        b.emit(Opcode::LoadNull, 1);
        b.emit(Opcode::Return, -1);
        let code = b.build(0).unwrap();
        // JumpIfFalse at offset 1; operand must skip LoadNull+Return (2 bytes).
        assert_eq!(code.bytecode[1], Opcode::JumpIfFalse as u8);
        assert_eq!(i16::from_le_bytes([code.bytecode[2], code.bytecode[3]]), 2);
    }

    #[test]
    fn test_backward_jump_resolves_immediately() {
        let mut b = CodeBuilder::new(false);
        let begin = b.new_label();
        b.mark(begin);
        b.emit(Opcode::Nop, 0);
        b.jump(Opcode::Jump, begin);
        let code = b.build(0).unwrap();
        // Jump at offset 1, target 0: 0 - (1 + 3) = -4.
        assert_eq!(i16::from_le_bytes([code.bytecode[2], code.bytecode[3]]), -4);
    }

    #[test]
    fn test_multiple_sites_one_label() {
        let mut b = CodeBuilder::new(false);
        let end = b.new_label();
        b.emit(Opcode::LoadTrue, 1);
        b.jump(Opcode::JumpIfFalse, end);
        b.emit(Opcode::LoadTrue, 1);
        b.jump(Opcode::JumpIfFalse, end);
        b.mark(end);
        let code = b.build(0).unwrap();
        assert_eq!(i16::from_le_bytes([code.bytecode[2], code.bytecode[3]]), 5);
        assert_eq!(i16::from_le_bytes([code.bytecode[6], code.bytecode[7]]), 0);
    }

    #[test]
    fn test_constant_pool_dedup() {
        let mut b = CodeBuilder::new(false);
        let a = b.add_const(PoolConst::Int(7));
        let c = b.add_const(PoolConst::Str("k".into()));
        let again = b.add_const(PoolConst::Int(7));
        assert_eq!(a, again);
        assert_ne!(a, c);
    }

    #[test]
    fn test_line_table_records_once_per_line() {
        let mut b = CodeBuilder::new(true);
        b.set_location(Loc::new(3, 10));
        b.emit(Opcode::LoadNull, 1);
        b.set_location(Loc::new(3, 14));
        b.emit(Opcode::Pop, -1);
        b.set_location(Loc::new(4, 20));
        b.emit(Opcode::LoadNull, 1);
        let code = b.build(0).unwrap();
        assert_eq!(
            code.line_table,
            vec![LineEntry { offset: 0, line: 3 }, LineEntry { offset: 2, line: 4 }]
        );
    }

    #[test]
    fn test_stack_depth_tracking() {
        let mut b = CodeBuilder::new(false);
        b.emit(Opcode::LoadNull, 1);
        b.emit(Opcode::Dup, 1);
        b.emit(Opcode::Pop, -1);
        b.emit(Opcode::Pop, -1);
        let code = b.build(0).unwrap();
        assert_eq!(code.max_stack, 2);
    }
}
