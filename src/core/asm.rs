// This module defines Asm, the final encoded form of one function: the target record, the
// function name, the machine code bytes and the resolved offset of every label the
// function issued. Handing the bytes to executable memory is left to the embedder. Two
// outputs are provided on top of the raw bytes: a per-instruction disassembly listing
// produced by the target's disassembler hook, and an ELF relocatable object written with
// the object crate that places the code in .text under one global function symbol.

//! Encoded machine code.

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

use super::arch::{Arch, ArchId};
use super::error::{CompileError, CompileResult};
use super::label::Label;

#[derive(Debug, Clone)]
pub struct Asm {
    arch: Arch,
    name: String,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
}

impl Asm {
    pub fn new(arch: &Arch, name: &str, code: Vec<u8>, labels: Vec<Option<usize>>) -> Self {
        Self {
            arch: *arch,
            name: name.to_string(),
            code,
            labels,
        }
    }

    pub fn arch(&self) -> ArchId {
        self.arch.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Offset of `label` in the code, if it was bound.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.index() as usize).copied().flatten()
    }

    pub fn label_offsets(&self) -> &[Option<usize>] {
        &self.labels
    }

    /// One line per instruction, or a hex dump when the target has no disassembler.
    pub fn disassemble(&self) -> Vec<String> {
        let lines = match self.arch.disassemble {
            Some(disassemble) => disassemble(&self.code),
            None => self
                .code
                .chunks(16)
                .enumerate()
                .map(|(i, chunk)| {
                    let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
                    format!("{:04X} {}", i * 16, hex.join(" "))
                })
                .collect(),
        };
        for line in &lines {
            log::trace!("{}: {}", self.name, line);
        }
        lines
    }

    /// ELF relocatable object with the code in `.text` under `symbol`.
    pub fn to_object(&self, symbol: &str) -> CompileResult<Vec<u8>> {
        let architecture = self.arch.object_arch.ok_or_else(|| CompileError::Object {
            reason: format!("no object format known for {}", self.arch.name),
        })?;
        let mut obj = Object::new(BinaryFormat::Elf, architecture, Endianness::Little);
        let text = obj.section_id(StandardSection::Text);
        let offset = obj.append_section_data(text, &self.code, 16);
        obj.add_symbol(Symbol {
            name: symbol.as_bytes().to_vec(),
            value: offset,
            size: self.code.len() as u64,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
        let bytes = obj.write().map_err(|e| CompileError::Object {
            reason: e.to_string(),
        })?;
        log::debug!("wrote object for {}: {} bytes", symbol, bytes.len());
        Ok(bytes)
    }
}
