//! amd64 general-purpose registers.
//!
//! Hardware numbering: the low three bits go in ModRM/SIB fields, bit 3 in
//! the REX prefix.

use crate::core::arch::ArchId;
use crate::core::expr::HardReg;

const fn gpr(index: u8) -> HardReg {
    HardReg::new(ArchId::AMD64, index)
}

pub const RAX: HardReg = gpr(0);
pub const RCX: HardReg = gpr(1);
pub const RDX: HardReg = gpr(2);
pub const RBX: HardReg = gpr(3);
pub const RSP: HardReg = gpr(4);
pub const RBP: HardReg = gpr(5);
pub const RSI: HardReg = gpr(6);
pub const RDI: HardReg = gpr(7);
pub const R8: HardReg = gpr(8);
pub const R9: HardReg = gpr(9);
pub const R10: HardReg = gpr(10);
pub const R11: HardReg = gpr(11);
pub const R12: HardReg = gpr(12);
pub const R13: HardReg = gpr(13);
pub const R14: HardReg = gpr(14);
pub const R15: HardReg = gpr(15);

/// Handed out by the register allocator. RAX, RCX and RDX have fixed jobs
/// (results, shift counts, division), R10 and R11 are lowering scratch.
/// Caller-saved registers come first so short functions need no prologue.
pub const ALLOCATABLE: &[HardReg] = &[RSI, RDI, R8, R9, RBX, R12, R13, R14, R15];

pub const SCRATCH: &[HardReg] = &[R10, R11];

/// Preserved across calls by the System V ABI (RBP and RSP are never allocated).
pub const CALLEE_SAVED: &[HardReg] = &[RBX, R12, R13, R14, R15];

const NAMES64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const NAMES32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d",
];
const NAMES16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w",
    "r13w", "r14w", "r15w",
];
const NAMES8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];

/// Assembler name of `reg` viewed with `size` bytes.
pub fn name(reg: HardReg, size: u32) -> &'static str {
    let i = (reg.index() & 15) as usize;
    match size {
        1 => NAMES8[i],
        2 => NAMES16[i],
        4 => NAMES32[i],
        _ => NAMES64[i],
    }
}

/// Byte registers that exist only with a REX prefix (spl, bpl, sil, dil).
pub fn needs_rex_as_byte(index: u8) -> bool {
    (4..8).contains(&index)
}
