//! Byte buffer with label resolution.
//!
//! Fixed-width little-endian emitters plus `rel32` label references. A
//! reference to a label that is not bound yet is recorded and patched when
//! [`Assembler::bind`] reaches it. A bound offset never changes.

use super::error::{CompileError, CompileResult};
use super::label::Label;

#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Offset of the 32-bit field; the displacement is relative to its end.
    at: usize,
    label: Label,
}

#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembler that expects `num_labels` labels; more are accepted.
    pub fn with_labels(num_labels: usize) -> Self {
        Self {
            labels: vec![None; num_labels],
            ..Self::default()
        }
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    pub fn emit_u8(&mut self, v: u8) {
        self.code.push(v);
    }

    pub fn emit_u16(&mut self, v: u16) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn emit_u32(&mut self, v: u32) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn emit_u64(&mut self, v: u64) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn emit_i8(&mut self, v: i8) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn emit_i16(&mut self, v: i16) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn emit_i32(&mut self, v: i32) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn emit_i64(&mut self, v: i64) {
        self.emit_bytes(&v.to_le_bytes());
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.index() as usize).copied().flatten()
    }

    fn slot(&mut self, label: Label) -> &mut Option<usize> {
        let i = label.index() as usize;
        if i >= self.labels.len() {
            self.labels.resize(i + 1, None);
        }
        &mut self.labels[i]
    }

    /// Bind `label` to the current offset and patch references waiting on it.
    pub fn bind(&mut self, label: Label) -> CompileResult<()> {
        let here = self.offset();
        let slot = self.slot(label);
        if slot.is_some() {
            return Err(CompileError::LabelRedefined {
                index: label.index(),
            });
        }
        *slot = Some(here);

        let (ready, waiting): (Vec<Fixup>, Vec<Fixup>) = std::mem::take(&mut self.fixups)
            .into_iter()
            .partition(|fx| fx.label == label);
        self.fixups = waiting;
        for fx in ready {
            log::trace!("patch {} at {:#x} -> {:#x}", label, fx.at, here);
            self.patch_rel32(fx.at, here)?;
        }
        Ok(())
    }

    fn patch_rel32(&mut self, at: usize, target: usize) -> CompileResult<()> {
        let rel = target as i64 - (at as i64 + 4);
        let rel = i32::try_from(rel).map_err(|_| CompileError::FieldOverflow {
            what: "jump displacement",
            value: rel,
            bits: 32,
        })?;
        self.code[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        Ok(())
    }

    /// Emit a 32-bit displacement to `label`, relative to the end of the field.
    pub fn emit_rel32(&mut self, label: Label) -> CompileResult<()> {
        let at = self.offset();
        self.emit_u32(0);
        match self.label_offset(label) {
            Some(target) => self.patch_rel32(at, target),
            None => {
                self.fixups.push(Fixup { at, label });
                Ok(())
            }
        }
    }

    /// Buffer and label table; fails if a referenced label was never bound.
    pub fn finish(self) -> CompileResult<(Vec<u8>, Vec<Option<usize>>)> {
        if let Some(fx) = self.fixups.first() {
            return Err(CompileError::UnresolvedLabel {
                index: fx.label.index(),
            });
        }
        Ok((self.code, self.labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::label::LabelPool;

    #[test]
    fn test_little_endian_emitters() {
        let mut asm = Assembler::new();
        asm.emit_u16(0x1234);
        asm.emit_i32(-2);
        asm.emit_u64(1);
        assert_eq!(
            asm.code(),
            &[0x34, 0x12, 0xfe, 0xff, 0xff, 0xff, 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_forward_and_backward_references() {
        let mut pool = LabelPool::new();
        let (back, fwd) = (pool.new_label(), pool.new_label());
        let mut asm = Assembler::with_labels(pool.len());
        asm.bind(back).unwrap();
        asm.emit_u8(0x90);
        asm.emit_rel32(fwd).unwrap();
        asm.emit_rel32(back).unwrap();
        asm.bind(fwd).unwrap();
        let (code, labels) = asm.finish().unwrap();
        // fwd field at 1 ends at 5, target 9
        assert_eq!(&code[1..5], &4i32.to_le_bytes());
        // back field at 5 ends at 9, target 0
        assert_eq!(&code[5..9], &(-9i32).to_le_bytes());
        assert_eq!(labels, vec![Some(0), Some(9)]);
    }

    #[test]
    fn test_label_errors() {
        let mut pool = LabelPool::new();
        let l = pool.new_label();
        let mut asm = Assembler::new();
        asm.bind(l).unwrap();
        assert_eq!(asm.bind(l), Err(CompileError::LabelRedefined { index: 0 }));

        let dangling = pool.new_label();
        let mut asm = Assembler::new();
        asm.emit_rel32(dangling).unwrap();
        assert!(matches!(
            asm.finish(),
            Err(CompileError::UnresolvedLabel { index: 1 })
        ));
    }
}
