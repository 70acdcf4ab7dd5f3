// src/pipeline/history.rs

//! Bounded, most-recent-first list of finished executions.

use std::collections::VecDeque;

use tracing::debug;

use super::execution::ExecutionId;

#[derive(Debug)]
pub struct History {
    entries: VecDeque<ExecutionId>,
    limit: usize,
    selected: Option<ExecutionId>,
}

impl History {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
            selected: None,
        }
    }

    pub fn push_front(&mut self, id: ExecutionId) {
        self.entries.push_front(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = ExecutionId> + '_ {
        self.entries.iter().copied()
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.entries.contains(&id)
    }

    /// The explicitly selected execution, or the most recent one.
    pub fn selected(&self) -> Option<ExecutionId> {
        self.selected.or_else(|| self.entries.front().copied())
    }

    /// Whether an execution was picked explicitly.
    pub fn explicit_selection(&self) -> Option<ExecutionId> {
        self.selected
    }

    /// Select the `n`-th entry (1-based); `0` clears the selection.
    ///
    /// Returns `false` and leaves the selection alone when `n` is out of
    /// range.
    pub fn select(&mut self, n: usize) -> bool {
        if n == 0 {
            self.selected = None;
            return true;
        }
        match self.entries.get(n - 1) {
            Some(&id) => {
                self.selected = Some(id);
                true
            }
            None => false,
        }
    }

    /// Evict from the oldest end until the bound holds again, never
    /// evicting pinned executions or the selected one.
    ///
    /// Returns the evicted executions so their state can be released.
    pub fn trim(&mut self, is_pinned: impl Fn(ExecutionId) -> bool) -> Vec<ExecutionId> {
        let mut evicted = Vec::new();

        while self.entries.len() > self.limit {
            let victim = self
                .entries
                .iter()
                .rposition(|&id| Some(id) != self.selected && !is_pinned(id));
            match victim {
                Some(pos) => {
                    if let Some(id) = self.entries.remove(pos) {
                        evicted.push(id);
                    }
                }
                None => break,
            }
        }

        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), kept = self.entries.len(), "trimmed history");
        }
        evicted
    }
}
