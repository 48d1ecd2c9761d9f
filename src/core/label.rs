//! Jump targets.
//!
//! A [`Label`] is an index into the [`LabelPool`] of the function that issued
//! it. Indices are handed out once and never reused, so a label may be
//! referenced before the assembler knows its address and stays valid after.

use std::fmt;

/// Identifies a jump target within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Arena of label records for one function.
#[derive(Debug, Clone, Default)]
pub struct LabelPool {
    names: Vec<Option<String>>,
}

impl LabelPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh anonymous label.
    pub fn new_label(&mut self) -> Label {
        self.push(None)
    }

    /// Issue a fresh label carrying a debug name.
    pub fn named(&mut self, name: &str) -> Label {
        self.push(Some(name.to_string()))
    }

    fn push(&mut self, name: Option<String>) -> Label {
        let label = Label(self.names.len() as u32);
        self.names.push(name);
        label
    }

    pub fn name(&self, label: Label) -> Option<&str> {
        self.names.get(label.0 as usize)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, label: Label) -> bool {
        (label.0 as usize) < self.names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let mut pool = LabelPool::new();
        let a = pool.new_label();
        let b = pool.named("loop");
        let c = pool.clone().new_label();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(c.index(), 2);
        assert_eq!(pool.name(b), Some("loop"));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(b) && !pool.contains(c));
    }
}
