use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result, bail};
use tracing::trace;

use crate::opcode::Bytecode;

/// Instruction stream of one method.
///
/// Opcode bytes can be overwritten while other threads execute the same
/// code. A rewrite always replaces a bytecode with a form that has the same
/// meaning, so a reader that observes either the old or the new byte behaves
/// correctly. Patches are plain relaxed stores; there is no ordering between a
/// patch and readers on other threads, they just see the quicker form later.
#[derive(Debug)]
pub struct CodeBuffer {
    bytes: Box<[AtomicU8]>,
}

impl CodeBuffer {
    pub fn new(code: &[u8]) -> Self {
        Self {
            bytes: code.iter().map(|byte| AtomicU8::new(*byte)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes
            .iter()
            .map(|byte| byte.load(Ordering::Relaxed))
            .collect()
    }

    pub fn u1(&self, bci: usize) -> Result<u8> {
        Ok(self
            .bytes
            .get(bci)
            .context(format!("premature end of code at {bci}"))?
            .load(Ordering::Relaxed))
    }

    pub fn s1(&self, bci: usize) -> Result<i8> {
        Ok(self.u1(bci)? as i8)
    }

    pub fn u2(&self, bci: usize) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u1(bci)?, self.u1(bci + 1)?]))
    }

    pub fn s2(&self, bci: usize) -> Result<i16> {
        Ok(self.u2(bci)? as i16)
    }

    pub fn u4(&self, bci: usize) -> Result<u32> {
        Ok(u32::from_be_bytes([
            self.u1(bci)?,
            self.u1(bci + 1)?,
            self.u1(bci + 2)?,
            self.u1(bci + 3)?,
        ]))
    }

    pub fn s4(&self, bci: usize) -> Result<i32> {
        Ok(self.u4(bci)? as i32)
    }

    pub fn bytecode_at(&self, bci: usize) -> Result<Bytecode> {
        Bytecode::from_u8(self.u1(bci)?)
    }

    /// Overwrites the opcode at `bci`
    pub fn patch(&self, bci: usize, bytecode: Bytecode) -> Result<()> {
        let slot = self
            .bytes
            .get(bci)
            .context(format!("patch outside of code at {bci}"))?;
        trace!("patching {bci} to {bytecode}");
        slot.store(bytecode as u8, Ordering::Relaxed);
        Ok(())
    }

    /// First 4-byte aligned offset after the opcode at `bci`
    pub fn aligned_operands(bci: usize) -> usize {
        (bci + 4) & !3
    }

    pub fn table_switch(&self, bci: usize) -> Result<TableSwitch> {
        let base = Self::aligned_operands(bci);
        let default = self.s4(base)?;
        let low = self.s4(base + 4)?;
        let high = self.s4(base + 8)?;
        if high < low {
            bail!("tableswitch at {bci} has high {high} below low {low}");
        }

        Ok(TableSwitch {
            default,
            low,
            high,
            offsets: base + 12,
        })
    }

    pub fn lookup_switch(&self, bci: usize) -> Result<LookupSwitch> {
        let base = Self::aligned_operands(bci);
        let default = self.s4(base)?;
        let npairs = self.s4(base + 4)?;
        if npairs < 0 {
            bail!("lookupswitch at {bci} has negative pair count {npairs}");
        }

        Ok(LookupSwitch {
            default,
            npairs: npairs as usize,
            pairs: base + 8,
        })
    }

    /// Length of the instruction at `bci`, switch tables and `wide` included
    pub fn instruction_length_at(&self, bci: usize) -> Result<usize> {
        let bytecode = self.bytecode_at(bci)?;
        if let Some(length) = bytecode.length() {
            return Ok(length);
        }

        match bytecode {
            Bytecode::Tableswitch => {
                let table = self.table_switch(bci)?;
                Ok(table.offsets + 4 * table.len() - bci)
            }
            Bytecode::Lookupswitch | Bytecode::FastLinearswitch | Bytecode::FastBinaryswitch => {
                let lookup = self.lookup_switch(bci)?;
                Ok(lookup.pairs + 8 * lookup.npairs - bci)
            }
            Bytecode::Wide => {
                let modified = self.bytecode_at(bci + 1)?;
                modified
                    .wide_length()
                    .context(format!("{modified} can not be wide"))
            }
            _ => bail!("length of {bytecode} at {bci} depends on the original bytecode"),
        }
    }
}

/// Operands of a `tableswitch`, offsets are read on demand
#[derive(Debug, Clone, Copy)]
pub struct TableSwitch {
    pub default: i32,
    pub low: i32,
    pub high: i32,
    offsets: usize,
}

impl TableSwitch {
    pub fn len(&self) -> usize {
        (self.high as i64 - self.low as i64 + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self, code: &CodeBuffer, index: usize) -> Result<i32> {
        code.s4(self.offsets + 4 * index)
    }
}

/// Operands of a `lookupswitch`, pairs are sorted by match value
#[derive(Debug, Clone, Copy)]
pub struct LookupSwitch {
    pub default: i32,
    pub npairs: usize,
    pairs: usize,
}

impl LookupSwitch {
    pub fn pair(&self, code: &CodeBuffer, index: usize) -> Result<(i32, i32)> {
        let at = self.pairs + 8 * index;
        Ok((code.s4(at)?, code.s4(at + 4)?))
    }

    pub fn key(&self, code: &CodeBuffer, index: usize) -> Result<i32> {
        code.s4(self.pairs + 8 * index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_operands() {
        let code = CodeBuffer::new(&[0x11, 0xff, 0xfe, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(code.u1(0).unwrap(), 0x11);
        assert_eq!(code.s1(1).unwrap(), -1);
        assert_eq!(code.u2(1).unwrap(), 0xfffe);
        assert_eq!(code.s2(1).unwrap(), -2);
        assert_eq!(code.u4(3).unwrap(), 0x00010203);
        assert!(code.u2(6).is_err());
    }

    #[test]
    fn patch_is_visible() {
        let code = CodeBuffer::new(&[Bytecode::Iload as u8, 0]);
        code.patch(0, Bytecode::FastIload).unwrap();
        assert_eq!(code.bytecode_at(0).unwrap(), Bytecode::FastIload);
        assert!(code.patch(5, Bytecode::Nop).is_err());
    }

    #[test]
    fn aligned_operands() {
        assert_eq!(CodeBuffer::aligned_operands(0), 4);
        assert_eq!(CodeBuffer::aligned_operands(1), 4);
        assert_eq!(CodeBuffer::aligned_operands(3), 4);
        assert_eq!(CodeBuffer::aligned_operands(4), 8);
    }

    #[test]
    fn lookup_switch_length() {
        // lookupswitch at 1, padding 2, default, npairs = 1, one pair
        let mut raw = vec![Bytecode::Nop as u8, Bytecode::Lookupswitch as u8, 0, 0];
        raw.extend_from_slice(&10i32.to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(&7i32.to_be_bytes());
        raw.extend_from_slice(&20i32.to_be_bytes());
        let code = CodeBuffer::new(&raw);

        assert_eq!(code.instruction_length_at(1).unwrap(), raw.len() - 1);
        let lookup = code.lookup_switch(1).unwrap();
        assert_eq!(lookup.default, 10);
        assert_eq!(lookup.pair(&code, 0).unwrap(), (7, 20));
    }

    #[test]
    fn table_switch_length() {
        let mut raw = vec![Bytecode::Tableswitch as u8, 0, 0, 0];
        raw.extend_from_slice(&3i32.to_be_bytes());
        raw.extend_from_slice(&(-1i32).to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        for offset in [4i32, 5, 6] {
            raw.extend_from_slice(&offset.to_be_bytes());
        }
        let code = CodeBuffer::new(&raw);

        let table = code.table_switch(0).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.offset(&code, 2).unwrap(), 6);
        assert_eq!(code.instruction_length_at(0).unwrap(), raw.len());
    }

    #[test]
    fn wide_length() {
        let code = CodeBuffer::new(&[Bytecode::Wide as u8, Bytecode::Iinc as u8, 0, 1, 0, 1]);
        assert_eq!(code.instruction_length_at(0).unwrap(), 6);
        let code = CodeBuffer::new(&[Bytecode::Wide as u8, Bytecode::Iadd as u8]);
        assert!(code.instruction_length_at(0).is_err());
    }
}
