use std::collections::VecDeque;

use crate::code_cache::CodePtr;

/// Weak reference to the last program matched in a bucket.
///
/// `prog` is a slot index into the program table, never an owner. It is dropped whenever
/// the microcode is written or that program is evicted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QuickRef {
    pub prog: usize,
    pub entry: CodePtr,
}

/// Candidate programs sharing one entry point, most recently used first
#[derive(Debug, Default)]
pub struct ProgramList {
    list: VecDeque<usize>,
    quick: Option<QuickRef>,
}

impl ProgramList {
    pub fn quick(&self) -> Option<QuickRef> {
        self.quick
    }

    pub(crate) fn set_quick(&mut self, quick: QuickRef) {
        self.quick = Some(quick);
    }

    pub(crate) fn invalidate_quick(&mut self) {
        self.quick = None;
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.list.iter().copied()
    }

    pub fn contains(&self, prog: usize) -> bool {
        self.list.contains(&prog)
    }

    pub(crate) fn push_front(&mut self, prog: usize) {
        self.list.push_front(prog);
    }

    /// Moves the entry at `pos` to the front
    pub(crate) fn promote(&mut self, pos: usize) {
        if let Some(prog) = self.list.remove(pos) {
            self.list.push_front(prog);
        }
    }

    /// Unlinks `prog` and drops the quick reference. Returns false if it wasn't listed.
    pub(crate) fn remove(&mut self, prog: usize) -> bool {
        match self.list.iter().position(|p| *p == prog) {
            Some(pos) => {
                self.list.remove(pos);
                self.quick = None;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.list.clear();
        self.quick = None;
    }
}
