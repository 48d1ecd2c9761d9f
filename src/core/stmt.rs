// This module defines the structured statements a front end stores in a Func and the
// flattening pass that turns them into a labelled expression sequence. Blocks lower their
// children in order. An if statement jumps to its else label on the negated condition and
// jumps over the else branch at the end of the then branch. Loops get three labels (top,
// test, break), always enter through the test, and end with a conditional jump back to
// the top that is unconditionally true when the loop has no condition. Break and continue
// resolve through stacks of enclosing loop labels, so the innermost loop always wins.
// After flattening no structured construct remains downstream.

//! Structured statements and their flattening.

use std::fmt;

use super::compiled::Compiled;
use super::constant::Const;
use super::error::{CompileError, CompileResult};
use super::expr::Expr;
use super::kind::Kind;
use super::label::Label;
use super::op::Op;

/// Structured statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Expr(Expr),
}

fn check_cond(what: Op, cond: &Expr) -> CompileResult<()> {
    if cond.kind() != Kind::Bool {
        return Err(CompileError::invalid_op(what, &[cond.kind()]));
    }
    Ok(())
}

impl Stmt {
    pub fn block(list: Vec<Stmt>) -> Stmt {
        Stmt::Block(list)
    }

    pub fn if_(cond: Expr, then: Stmt, els: Option<Stmt>) -> CompileResult<Stmt> {
        check_cond(Op::JumpIf, &cond)?;
        Ok(Stmt::If {
            cond,
            then: Box::new(then),
            els: els.map(Box::new),
        })
    }

    pub fn for_(
        init: Option<Stmt>,
        cond: Option<Expr>,
        post: Option<Stmt>,
        body: Stmt,
    ) -> CompileResult<Stmt> {
        if let Some(cond) = &cond {
            check_cond(Op::JumpIf, cond)?;
        }
        Ok(Stmt::For {
            init: init.map(Box::new),
            cond,
            post: post.map(Box::new),
            body: Box::new(body),
        })
    }

    pub fn while_(cond: Expr, body: Stmt) -> CompileResult<Stmt> {
        Stmt::for_(None, Some(cond), None, body)
    }

    pub fn break_() -> Stmt {
        Stmt::Break
    }

    pub fn continue_() -> Stmt {
        Stmt::Continue
    }

    pub fn expr(expr: Expr) -> Stmt {
        Stmt::Expr(expr)
    }

    /// Visit every expression held directly by this statement or a nested one.
    pub fn for_each_expr(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            Stmt::Block(list) => list.iter().for_each(|s| s.for_each_expr(f)),
            Stmt::If { cond, then, els } => {
                f(cond);
                then.for_each_expr(f);
                if let Some(els) = els {
                    els.for_each_expr(f);
                }
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
            } => {
                if let Some(init) = init {
                    init.for_each_expr(f);
                }
                if let Some(cond) = cond {
                    f(cond);
                }
                if let Some(post) = post {
                    post.for_each_expr(f);
                }
                body.for_each_expr(f);
            }
            Stmt::Expr(e) => f(e),
            Stmt::Break | Stmt::Continue => {}
        }
    }
}

fn or_nil<T: fmt::Display>(v: &Option<T>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "nil".to_string(),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Block(list) => {
                f.write_str("(BLOCK")?;
                for s in list {
                    write!(f, " {s}")?;
                }
                f.write_str(")")
            }
            Stmt::If { cond, then, els } => write!(f, "(if {cond} {then} {})", or_nil(els)),
            Stmt::For {
                init,
                cond,
                post,
                body,
            } => write!(
                f,
                "(for {} {} {} {body})",
                or_nil(init),
                or_nil(cond),
                or_nil(post)
            ),
            Stmt::Break => f.write_str("(break)"),
            Stmt::Continue => f.write_str("(continue)"),
            Stmt::Expr(e) => write!(f, "{e}"),
        }
    }
}

/// Lowers statements into a Compiled sequence.
pub(crate) struct Flattener<'a> {
    out: &'a mut Compiled,
    breaks: Vec<Label>,
    continues: Vec<Label>,
}

impl<'a> Flattener<'a> {
    pub(crate) fn new(out: &'a mut Compiled) -> Self {
        Self {
            out,
            breaks: Vec::new(),
            continues: Vec::new(),
        }
    }

    pub(crate) fn lower(&mut self, stmt: Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Block(list) => {
                for s in list {
                    self.lower(s)?;
                }
            }
            Stmt::Expr(e) => self.out.add(e),
            Stmt::If { cond, then, els } => {
                let else_label = self.out.new_label();
                let end = self.out.new_label();
                let not = Expr::unary(Op::LNot, cond)?;
                self.out.add(Expr::jump_if(else_label, not)?);
                self.lower(*then)?;
                self.out.add(Expr::jump(end));
                self.out.add(Expr::Label(else_label));
                if let Some(els) = els {
                    self.lower(*els)?;
                }
                self.out.add(Expr::Label(end));
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
            } => {
                let top = self.out.new_label();
                let test = self.out.new_label();
                let exit = self.out.new_label();
                if let Some(init) = init {
                    self.lower(*init)?;
                }
                self.breaks.push(exit);
                self.continues.push(test);
                self.out.add(Expr::jump(test));
                self.out.add(Expr::Label(top));
                self.lower(*body)?;
                if let Some(post) = post {
                    self.lower(*post)?;
                }
                self.out.add(Expr::Label(test));
                let cond = cond.unwrap_or(Expr::Const(Const::bool(true)));
                self.out.add(Expr::jump_if(top, cond)?);
                self.out.add(Expr::Label(exit));
                self.breaks.pop();
                self.continues.pop();
            }
            Stmt::Break => {
                let target = self
                    .breaks
                    .last()
                    .copied()
                    .ok_or(CompileError::OutsideLoop { stmt: "break" })?;
                self.out.add(Expr::jump(target));
            }
            Stmt::Continue => {
                let target = self
                    .continues
                    .last()
                    .copied()
                    .ok_or(CompileError::OutsideLoop { stmt: "continue" })?;
                self.out.add(Expr::jump(target));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::func::{Func, Signature};

    #[test]
    fn test_empty_for_display() {
        let s = Stmt::for_(None, None, None, Stmt::block(vec![])).unwrap();
        assert_eq!(s.to_string(), "(for nil nil nil (BLOCK))");
        assert_eq!(Stmt::break_().to_string(), "(break)");
    }

    #[test]
    fn test_condition_must_be_bool() {
        let c = Expr::Const(Const::int32(1));
        assert!(Stmt::while_(c, Stmt::block(vec![])).is_err());
    }

    #[test]
    fn test_break_outside_loop() {
        let mut f = Func::new("f", Signature::default());
        f.add_stmt(Stmt::continue_()).unwrap();
        assert!(matches!(
            f.compile(),
            Err(CompileError::OutsideLoop { stmt: "continue" })
        ));
    }
}
