use anyhow::{Context, Result, bail};

use crate::code::CodeBuffer;
use crate::opcode::Bytecode;

/// A branch target. Create it with [`Assembler::label`], place it with
/// [`Assembler::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    label: Label,
    /// Position of the offset bytes in the buffer.
    at: usize,
    /// Bci of the instruction the offset is relative to.
    base: usize,
    wide: bool,
}

/// Builds method code one instruction at a time.
///
/// Branch offsets are relative to the branching instruction and are patched
/// in by [`Assembler::finish`] once every label is bound. Local variable
/// accesses automatically get a `wide` prefix when the index needs it.
#[derive(Debug, Default)]
pub struct Assembler {
    buf: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current byte offset in the code.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(fixup.label.0)
                .copied()
                .flatten()
                .context(format!("label {} was never bound", fixup.label.0))?;
            let offset = target as i64 - fixup.base as i64;
            if fixup.wide {
                let offset = i32::try_from(offset)?;
                self.buf[fixup.at..fixup.at + 4].copy_from_slice(&offset.to_be_bytes());
            } else {
                let offset = i16::try_from(offset)
                    .context(format!("branch offset {offset} needs a wide branch"))?;
                self.buf[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_be_bytes());
            }
        }

        Ok(self.buf)
    }

    pub fn finish_code(self) -> Result<CodeBuffer> {
        Ok(CodeBuffer::new(&self.finish()?))
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn emit_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn emit_op(&mut self, op: Bytecode) {
        self.buf.push(op as u8);
    }

    fn align(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.emit_u8(0);
        }
    }

    fn reference(&mut self, label: Label, base: usize, wide: bool) {
        self.fixups.push(Fixup {
            label,
            at: self.buf.len(),
            base,
            wide,
        });
        if wide {
            self.emit_i32(0);
        } else {
            self.emit_u16(0);
        }
    }

    // ── labels ─────────────────────────────────────────────────────

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> Result<()> {
        let slot = self
            .labels
            .get_mut(label.0)
            .context(format!("unknown label {}", label.0))?;
        if slot.is_some() {
            bail!("label {} bound twice", label.0);
        }
        *slot = Some(self.buf.len());
        Ok(())
    }

    // ── instructions ───────────────────────────────────────────────

    /// An instruction without operands.
    pub fn op(&mut self, op: Bytecode) -> &mut Self {
        self.emit_op(op);
        self
    }

    /// An instruction with a one byte operand (`bipush`, `ldc`, `newarray`).
    pub fn op_u1(&mut self, op: Bytecode, operand: u8) -> &mut Self {
        self.emit_op(op);
        self.emit_u8(operand);
        self
    }

    /// An instruction with a two byte operand, usually a constant pool index.
    pub fn op_u2(&mut self, op: Bytecode, operand: u16) -> &mut Self {
        self.emit_op(op);
        self.emit_u16(operand);
        self
    }

    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1 => self.op(Bytecode::IconstM1),
            0 => self.op(Bytecode::Iconst0),
            1 => self.op(Bytecode::Iconst1),
            2 => self.op(Bytecode::Iconst2),
            3 => self.op(Bytecode::Iconst3),
            4 => self.op(Bytecode::Iconst4),
            5 => self.op(Bytecode::Iconst5),
            _ => {
                if let Ok(v) = i8::try_from(value) {
                    self.op_u1(Bytecode::Bipush, v as u8)
                } else {
                    let v = value as i16;
                    self.op_u2(Bytecode::Sipush, v as u16)
                }
            }
        }
    }

    /// A local variable access (`iload`, `astore`, `ret`, ...), `wide` when the index needs it.
    pub fn local(&mut self, op: Bytecode, index: u16) -> &mut Self {
        if let Ok(index) = u8::try_from(index) {
            self.op_u1(op, index)
        } else {
            self.emit_op(Bytecode::Wide);
            self.op_u2(op, index)
        }
    }

    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        match (u8::try_from(index), i8::try_from(delta)) {
            (Ok(index), Ok(delta)) => {
                self.emit_op(Bytecode::Iinc);
                self.emit_u8(index);
                self.emit_u8(delta as u8);
            }
            _ => {
                self.emit_op(Bytecode::Wide);
                self.emit_op(Bytecode::Iinc);
                self.emit_u16(index);
                self.emit_u16(delta as u16);
            }
        }
        self
    }

    /// `invokeinterface <index:u16> <count:u8> 0`
    pub fn invokeinterface(&mut self, index: u16, count: u8) -> &mut Self {
        self.op_u2(Bytecode::Invokeinterface, index);
        self.emit_u8(count);
        self.emit_u8(0);
        self
    }

    /// `invokedynamic <index:u16> 0 0`
    pub fn invokedynamic(&mut self, index: u16) -> &mut Self {
        self.op_u2(Bytecode::Invokedynamic, index);
        self.emit_u16(0);
        self
    }

    pub fn multianewarray(&mut self, index: u16, dimensions: u8) -> &mut Self {
        self.op_u2(Bytecode::Multianewarray, index);
        self.emit_u8(dimensions);
        self
    }

    /// A branch with a 16-bit offset (`if*`, `goto`, `jsr`).
    pub fn branch(&mut self, op: Bytecode, target: Label) -> &mut Self {
        let base = self.buf.len();
        self.emit_op(op);
        self.reference(target, base, false);
        self
    }

    /// `goto_w` or `jsr_w`.
    pub fn branch_w(&mut self, op: Bytecode, target: Label) -> &mut Self {
        let base = self.buf.len();
        self.emit_op(op);
        self.reference(target, base, true);
        self
    }

    pub fn tableswitch(&mut self, low: i32, default: Label, targets: &[Label]) -> &mut Self {
        let base = self.buf.len();
        self.emit_op(Bytecode::Tableswitch);
        self.align();
        self.reference(default, base, true);
        self.emit_i32(low);
        self.emit_i32(low + targets.len() as i32 - 1);
        for target in targets {
            self.reference(*target, base, true);
        }
        self
    }

    /// Pairs are sorted by match value before they are emitted.
    pub fn lookupswitch(&mut self, default: Label, pairs: &[(i32, Label)]) -> &mut Self {
        let mut pairs = pairs.to_vec();
        pairs.sort_by_key(|(key, _)| *key);

        let base = self.buf.len();
        self.emit_op(Bytecode::Lookupswitch);
        self.align();
        self.reference(default, base, true);
        self.emit_i32(pairs.len() as i32);
        for (key, target) in pairs {
            self.emit_i32(key);
            self.reference(target, base, true);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_branch() {
        let mut asm = Assembler::new();
        let top = asm.label();
        asm.bind(top).unwrap();
        asm.op(Bytecode::Nop);
        asm.branch(Bytecode::Goto, top);
        let code = asm.finish().unwrap();
        assert_eq!(code, vec![0x00, 0xa7, 0xff, 0xff]);
    }

    #[test]
    fn unbound_label() {
        let mut asm = Assembler::new();
        let nowhere = asm.label();
        asm.branch(Bytecode::Ifeq, nowhere);
        assert!(asm.finish().is_err());
    }

    #[test]
    fn double_bind() {
        let mut asm = Assembler::new();
        let label = asm.label();
        asm.bind(label).unwrap();
        assert!(asm.bind(label).is_err());
    }

    #[test]
    fn wide_locals() {
        let mut asm = Assembler::new();
        asm.local(Bytecode::Iload, 3).local(Bytecode::Istore, 300).iinc(1, 1000);
        let code = asm.finish().unwrap();
        assert_eq!(
            code,
            vec![0x15, 3, 0xc4, 0x36, 0x01, 0x2c, 0xc4, 0x84, 0x00, 0x01, 0x03, 0xe8]
        );
    }

    #[test]
    fn iconst_forms() {
        let mut asm = Assembler::new();
        asm.iconst(5).iconst(-2).iconst(1000);
        assert_eq!(asm.finish().unwrap(), vec![0x08, 0x10, 0xfe, 0x11, 0x03, 0xe8]);
    }

    #[test]
    fn lookupswitch_is_sorted_and_aligned() {
        let mut asm = Assembler::new();
        let default = asm.label();
        let a = asm.label();
        let b = asm.label();
        asm.op(Bytecode::Iconst0);
        asm.lookupswitch(default, &[(9, a), (-4, b)]);
        asm.bind(default).unwrap();
        asm.bind(a).unwrap();
        asm.bind(b).unwrap();
        asm.op(Bytecode::Return);

        let code = asm.finish_code().unwrap();
        let lookup = code.lookup_switch(1).unwrap();
        assert_eq!(lookup.npairs, 2);
        assert_eq!(lookup.key(&code, 0).unwrap(), -4);
        assert_eq!(lookup.key(&code, 1).unwrap(), 9);
        let length = code.instruction_length_at(1).unwrap();
        assert_eq!(lookup.default, length as i32);
    }
}
