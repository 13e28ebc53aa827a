//! Incremental construction of a [`CodeBlock`].

use crate::{CodeBlock, Instr, Label, Signature, ValueType};

/// Builder for one code block.
///
/// Parameter slots are declared up front from the signature; further slots
/// are appended with [`declare_slot`](Self::declare_slot) and never reused.
pub struct BlockBuilder {
    name: String,
    signature: Signature,
    slots: Vec<ValueType>,
    instrs: Vec<Instr>,
    lines: Vec<u32>,
    /// Line attached to the next emitted instruction
    current_line: u32,
    next_label: u32,
}

impl BlockBuilder {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let slots = signature.params.clone();
        Self {
            name: name.into(),
            signature,
            slots,
            instrs: Vec::new(),
            lines: Vec::new(),
            current_line: 0,
            next_label: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Allocate a fresh local slot.
    pub fn declare_slot(&mut self, ty: ValueType) -> u16 {
        self.slots.push(ty);
        (self.slots.len() - 1) as u16
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind `label` to the position of the next instruction.
    pub fn mark(&mut self, label: Label) {
        self.emit(Instr::Mark(label));
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
        self.lines.push(self.current_line);
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn finish(self) -> CodeBlock {
        CodeBlock {
            name: self.name,
            signature: self.signature,
            slots: self.slots,
            instrs: self.instrs,
            lines: self.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Constant;

    #[test]
    fn test_params_occupy_first_slots() {
        let mut builder = BlockBuilder::new("f", Signature::new(vec![ValueType::Int, ValueType::Char], None));
        assert_eq!(builder.slot_count(), 2);
        assert_eq!(builder.declare_slot(ValueType::Double), 2);
        let block = builder.finish();
        assert_eq!(block.slots, vec![ValueType::Int, ValueType::Char, ValueType::Double]);
    }

    #[test]
    fn test_lines_follow_instructions() {
        let mut builder = BlockBuilder::new("f", Signature::void());
        builder.set_line(3);
        builder.emit(Instr::Push(Constant::Int(1)));
        let label = builder.new_label();
        builder.set_line(4);
        builder.mark(label);
        builder.emit(Instr::Pop(ValueType::Int));
        let block = builder.finish();
        assert_eq!(block.lines, vec![3, 4, 4]);
        assert_eq!(block.instrs[1], Instr::Mark(label));
    }

    #[test]
    fn test_labels_are_distinct() {
        let mut builder = BlockBuilder::new("f", Signature::void());
        let a = builder.new_label();
        let b = builder.new_label();
        assert_ne!(a, b);
    }
}
