// This module serves as the central hub for the target-independent part of xjit. It
// exports the typed expression IR (kinds, ops, constants, registers, memory operands and
// the expression tree with its checked constructors), the structured statements a front
// end builds functions from, the flattening and dead-code elimination pass, the explicit
// architecture registry and compile context, the register-allocation contract with its
// linear-scan allocator, the lowering context target hooks work through, and the byte
// assembler with label back-patching that targets encode into.

//! Core xjit infrastructure
//!
//! # Key Components
//!
//! ## IR (`kind`, `op`, `constant`, `expr`)
//! - Every node carries one Kind fixed at construction
//! - Constant operands fold with width-correct arithmetic
//! - Swappable binary nodes keep the weaker operand class on the left
//!
//! ## Functions (`func`, `stmt`, `compiled`)
//! - Structured statements flatten into a labelled sequence
//! - Effect-free expressions are dropped as they are added
//!
//! ## Targets (`arch`, `lowering`, `regalloc`)
//! - Explicit registry instead of process-wide tables
//! - Allocation maps soft registers to hard registers or stack slots
//!
//! ## Output (`assembler`, `asm`)
//! - Little-endian emitters and write-once label offsets
//! - Disassembly listing and ELF object emission

pub mod arch;
pub mod asm;
pub mod assembler;
pub mod compiled;
pub mod constant;
pub mod error;
pub mod expr;
pub mod func;
pub mod kind;
pub mod label;
pub mod lowering;
pub mod op;
pub mod regalloc;
pub mod stmt;

pub use arch::{Arch, ArchId, ArchRegistry, CompileContext, CpuWidth};
pub use asm::Asm;
pub use assembler::Assembler;
pub use compiled::{ArchCompiled, Compiled};
pub use constant::Const;
pub use error::{CompileError, CompileResult};
pub use expr::{
    AddrMode, Address, BinaryExpr, CallExpr, Class, Expr, HardReg, Mem, Reg, RegId, TupleExpr,
    UnaryExpr, SOFT_REG_FIRST,
};
pub use func::{Func, Signature};
pub use kind::Kind;
pub use label::{Label, LabelPool};
pub use lowering::{Lowering, ScratchMark};
pub use op::{Cond, Op};
pub use regalloc::{Allocation, LinearScan, Location};
pub use stmt::Stmt;
