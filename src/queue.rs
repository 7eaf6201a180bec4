//! Single-pass priority queue of paint assignments.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::reconcile::MismatchEntry;

#[derive(Debug, Default)]
struct Generation {
    number: u64,
    entries: VecDeque<MismatchEntry>,
}

/// Work queue shared by all connections.
///
/// Only `pop` and wholesale `replace` are supported. Both run under one
/// mutex, so a pop sees either the old or the new generation and no entry is
/// handed out twice.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<Generation>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the head entry, if any.
    pub fn pop(&self) -> Option<MismatchEntry> {
        self.inner.lock().entries.pop_front()
    }

    /// Install a new generation, dropping whatever was left of the old one.
    /// Returns the new generation number.
    pub fn replace(&self, entries: Vec<MismatchEntry>) -> u64 {
        let mut inner = self.inner.lock();
        inner.number += 1;
        inner.entries = entries.into();
        inner.number
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().number
    }
}
