//! Functions under construction.
//!
//! A [`Func`] owns its [`Signature`], the registers allocated so far (the
//! first `num_params` of them are the arguments), its label pool and the
//! structured statement list that [`Func::compile`] flattens.

use std::fmt;

use super::compiled::Compiled;
use super::error::{CompileError, CompileResult};
use super::expr::{Expr, Reg, RegId, SOFT_REG_FIRST};
use super::kind::Kind;
use super::label::{Label, LabelPool};
use super::op::Op;
use super::stmt::{Flattener, Stmt};

/// Parameter kinds followed by result kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    kinds: Vec<Kind>,
    num_params: usize,
}

impl Signature {
    pub fn new(params: &[Kind], results: &[Kind]) -> Self {
        let mut kinds = params.to_vec();
        kinds.extend_from_slice(results);
        Self {
            kinds,
            num_params: params.len(),
        }
    }

    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn params(&self) -> &[Kind] {
        &self.kinds[..self.num_params]
    }

    pub fn results(&self) -> &[Kind] {
        &self.kinds[self.num_params..]
    }

    fn check_results(&self, values: &[Expr]) -> CompileResult<()> {
        let results = self.results();
        if values.len() != results.len() {
            return Err(CompileError::SignatureMismatch {
                reason: format!(
                    "return passes {} values, signature declares {}",
                    values.len(),
                    results.len()
                ),
            });
        }
        for (i, (v, want)) in values.iter().zip(results).enumerate() {
            if v.kind() != *want {
                return Err(CompileError::SignatureMismatch {
                    reason: format!("result {i} is {}, signature declares {want}", v.kind()),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |kinds: &[Kind]| {
            kinds
                .iter()
                .map(Kind::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(self.params()), join(self.results()))
    }
}

/// Function body being built by a front end.
#[derive(Debug, Clone)]
pub struct Func {
    name: String,
    sig: Signature,
    regs: Vec<Reg>,
    labels: LabelPool,
    source: Vec<Stmt>,
}

impl Func {
    /// New function with one soft register per parameter.
    pub fn new(name: &str, sig: Signature) -> Self {
        let mut func = Self {
            name: name.to_string(),
            sig,
            regs: Vec::new(),
            labels: LabelPool::new(),
            source: Vec::new(),
        };
        for i in 0..func.sig.num_params() {
            let kind = func.sig.params()[i];
            func.new_reg(kind);
        }
        func
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    /// Every register allocated so far, arguments first.
    pub fn regs(&self) -> &[Reg] {
        &self.regs
    }

    pub fn labels(&self) -> &LabelPool {
        &self.labels
    }

    pub fn source(&self) -> &[Stmt] {
        &self.source
    }

    /// Register holding argument `index`.
    pub fn arg(&self, index: usize) -> CompileResult<Expr> {
        if index >= self.sig.num_params() {
            return Err(CompileError::IndexOutOfRange {
                what: "arguments",
                index,
                len: self.sig.num_params(),
            });
        }
        Ok(Expr::Reg(self.regs[index]))
    }

    pub fn new_reg(&mut self, kind: Kind) -> Reg {
        let id = SOFT_REG_FIRST + self.regs.len() as u32;
        let reg = Reg::new(kind, RegId::Soft(id));
        self.regs.push(reg);
        reg
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.new_label()
    }

    pub fn named_label(&mut self, name: &str) -> Label {
        self.labels.named(name)
    }

    /// Append a statement after checking every return in it against the signature.
    pub fn add_stmt(&mut self, stmt: Stmt) -> CompileResult<()> {
        let mut result = Ok(());
        stmt.for_each_expr(&mut |e| {
            if result.is_ok() {
                result = self.check_returns(e);
            }
        });
        result?;
        self.source.push(stmt);
        Ok(())
    }

    pub fn add_expr(&mut self, expr: Expr) -> CompileResult<()> {
        self.add_stmt(Stmt::expr(expr))
    }

    fn check_returns(&self, expr: &Expr) -> CompileResult<()> {
        if let Expr::Tuple(t) = expr {
            if t.op() == Op::Ret {
                return self.sig.check_results(t.list());
            }
        }
        Ok(())
    }

    /// Flatten the statement list into a labelled expression sequence.
    pub fn compile(mut self) -> CompileResult<Compiled> {
        let source = std::mem::take(&mut self.source);
        let mut compiled = Compiled::new(self);
        let mut flat = Flattener::new(&mut compiled);
        for stmt in source {
            flat.lower(stmt)?;
        }
        log::debug!(
            "compiled {}: {} expressions, {} labels",
            compiled.func().name(),
            compiled.code().len(),
            compiled.func().labels().len()
        );
        Ok(compiled)
    }

    pub(crate) fn labels_mut(&mut self) -> &mut LabelPool {
        &mut self.labels
    }
}
