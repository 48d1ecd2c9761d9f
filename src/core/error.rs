// This module defines the error type for the xjit pipeline using the thiserror crate.
// CompileError covers every fatal condition the pipeline can hit: Kind/Op mismatches at
// IR construction, writes to read-only operands, bad child or argument indices, folding
// faults (division by zero, negative shift counts), soft registers the allocator never
// placed, immediates or displacements that overflow their encoding field, pointer-width
// mismatches between the compile context and a target, registry misuse, break/continue
// outside a loop, return values that disagree with the signature, label binding faults,
// exhaustion of the lowering scratch pool, shapes the encoder cannot express, and ELF
// object emission failures. All of these abort the current compilation. CompileResult<T>
// is the convenience alias used throughout the crate.

//! Error types for the xjit compiler.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use super::kind::Kind;
use super::op::Op;

/// Main error type for IR construction, lowering and encoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("invalid operation: {op} {kinds}")]
    InvalidOp { op: Op, kinds: String },

    #[error("cannot assign to {operand}: operand is read-only or not addressable")]
    NotAssignable { operand: String },

    #[error("index {index} out of range for {what} with {len} elements")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("memory operand of kind {kind} needs a pointer address, got {addr}")]
    InvalidAddress { kind: Kind, addr: Kind },

    #[error("integer division by zero in constant {kind} expression")]
    DivisionByZero { kind: Kind },

    #[error("negative shift count {count}")]
    NegativeShift { count: i64 },

    #[error("soft register s{id} was not allocated")]
    UnallocatedRegister { id: u32 },

    #[error("{what} {value} does not fit in a {bits}-bit field")]
    FieldOverflow {
        what: &'static str,
        value: i64,
        bits: u32,
    },

    #[error("architecture {arch} expects {expected}-bit pointers, context is configured for {actual}-bit")]
    WidthMismatch {
        arch: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("unknown architecture id {id}")]
    UnknownArch { id: u8 },

    #[error("architecture {name} is already registered")]
    DuplicateArch { name: &'static str },

    #[error("{stmt} outside of loop")]
    OutsideLoop { stmt: &'static str },

    #[error("signature mismatch: {reason}")]
    SignatureMismatch { reason: String },

    #[error("label L{index} bound twice")]
    LabelRedefined { index: u32 },

    #[error("label L{index} referenced but never bound")]
    UnresolvedLabel { index: u32 },

    #[error("out of scratch registers while lowering {context}")]
    ScratchExhausted { context: String },

    #[error("cannot encode {what}")]
    Unsupported { what: String },

    #[error("object emission failed: {reason}")]
    Object { reason: String },
}

impl CompileError {
    pub(crate) fn invalid_op(op: Op, kinds: &[Kind]) -> Self {
        let kinds = kinds
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        CompileError::InvalidOp { op, kinds }
    }

    pub(crate) fn unsupported(what: impl std::fmt::Display) -> Self {
        CompileError::Unsupported {
            what: what.to_string(),
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
