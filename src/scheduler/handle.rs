// src/scheduler/handle.rs

//! Generational node identifiers.

use std::fmt;

/// Identifier of a scheduler node: a slot index plus the slot's version at
/// the time the node was created.
///
/// Slots are recycled. Every time a slot is freed its version is bumped, so
/// a handle kept around after its node was removed no longer matches the
/// slot's live occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: usize,
    version: u64,
}

impl NodeHandle {
    pub(crate) fn new(index: usize, version: u64) -> Self {
        Self { index, version }
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn version(self) -> u64 {
        self.version
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.version)
    }
}
