//! Disassembly listing using iced-x86.

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter};

/// One `offset bytes mnemonic` line per decoded instruction.
pub fn disassemble(code: &[u8]) -> Vec<String> {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();
    let mut instruction = Instruction::default();
    let mut text = String::new();
    let mut lines = Vec::new();

    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        text.clear();
        formatter.format(&instruction, &mut text);
        let start = instruction.ip() as usize;
        let end = (start + instruction.len()).min(code.len());
        let bytes: String = code[start..end].iter().map(|b| format!("{b:02X}")).collect();
        lines.push(format!("{start:04X} {bytes:<24} {text}"));
    }
    lines
}
