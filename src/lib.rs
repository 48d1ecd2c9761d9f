//! xjit - typed expression IR and amd64 JIT back end.
//!
//! A front end builds functions out of typed expressions and structured
//! statements; xjit checks and folds them as they are built, flattens the
//! statements, allocates registers, selects amd64 instructions and encodes
//! them into bytes ready to be mapped executable.
//!
//! # Primary Usage
//!
//! ```ignore
//! use xjit::core::{ArchId, ArchRegistry, CompileContext, Expr, Func, Kind, Op, Signature};
//!
//! let registry = ArchRegistry::with_builtin();
//! let ctx = CompileContext::default();
//!
//! let mut f = Func::new("add", Signature::new(&[Kind::Int64, Kind::Int64], &[Kind::Int64]));
//! let sum = Expr::binary(Op::Add, f.arg(0)?, f.arg(1)?)?;
//! f.add_expr(Expr::ret(vec![sum])?)?;
//!
//! let asm = xjit::compile_function(&registry, &ctx, ArchId::AMD64, f)?;
//! for line in asm.disassemble() {
//!     println!("{line}");
//! }
//! ```
//!
//! # Architecture
//!
//! - [`core`] - IR, statements, registry, register allocation, assembler
//! - [`x64`] - amd64 lowering, address synthesis, encoder, disassembly
//! - [`pipeline`] - the stages strung together

pub mod core;
pub mod pipeline;
pub mod x64;

pub use core::{
    ArchCompiled, ArchId, ArchRegistry, Asm, CompileContext, CompileError, CompileResult,
    Compiled, Const, CpuWidth, Expr, Func, Kind, Label, Op, Reg, Signature, Stmt,
};
pub use pipeline::{compile_function, lower_function};
