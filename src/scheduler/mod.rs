// src/scheduler/mod.rs

//! Cooperative, tree-structured work scheduler.
//!
//! A unit of work ("process", unrelated to OS processes) is a boxed closure
//! that runs once per scheduling and tells the scheduler what to do next via
//! [`Step`]:
//!
//! - [`Step::Continue`] installs the next piece of work. It runs as soon as
//!   all children the node has scheduled so far have finished.
//! - [`Step::Suspend`] parks the node until someone calls
//!   [`Scheduler::resume`] for it, typically in response to an external
//!   event.
//! - [`Step::Done`] means the node has nothing left to do; it finishes once
//!   all of its children have finished.
//!
//! Nodes form a forest. A parent is never finished before all of its
//! children are, and a child finishing last wakes its parent. Finished roots
//! are removed immediately together with their subtree; a finished child
//! has its own subtree removed and stays around until its parent goes.
//!
//! The scheduler is single threaded and owns no IO. It is generic over a
//! context type `C` that every piece of work gets mutable access to.

mod handle;

pub use handle::NodeHandle;

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace, warn};

/// A piece of work run by the scheduler.
pub type Work<C> = Box<dyn FnOnce(&mut Scheduler<C>, NodeHandle, &mut C) -> Step<C>>;

/// What a node wants after one of its continuations has run.
pub enum Step<C> {
    Continue(Work<C>),
    Suspend,
    Done,
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Continue(_) => f.write_str("Continue(..)"),
            Step::Suspend => f.write_str("Suspend"),
            Step::Done => f.write_str("Done"),
        }
    }
}

struct Node<C> {
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    continuation: Option<Work<C>>,
    suspended: bool,
    finished: bool,
}

struct Slot<C> {
    version: u64,
    node: Option<Node<C>>,
}

/// Arena of generational nodes plus the queue of nodes to run this tick.
pub struct Scheduler<C> {
    slots: Vec<Slot<C>>,
    free: Vec<usize>,
    ready: VecDeque<NodeHandle>,
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("slots", &self.slots.len())
            .field("live", &self.live_count())
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Create a node for `work`, optionally as a child of `parent`, and queue
    /// it to run during the current (or next) tick.
    ///
    /// A parent that is stale or already finished cannot adopt children; the
    /// node becomes a root instead.
    pub fn schedule(&mut self, work: Work<C>, parent: Option<NodeHandle>) -> NodeHandle {
        let parent = parent.filter(|&p| match self.node(p) {
            Some(node) if !node.finished => true,
            _ => {
                warn!(parent = %p, "parent is gone or finished; scheduling as root");
                false
            }
        });

        let node = Node {
            parent,
            children: Vec::new(),
            continuation: Some(work),
            suspended: false,
            finished: false,
        };

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeHandle::new(index, slot.version)
            }
            None => {
                self.slots.push(Slot {
                    version: 0,
                    node: Some(node),
                });
                NodeHandle::new(self.slots.len() - 1, 0)
            }
        };

        if let Some(p) = parent {
            if let Some(parent_node) = self.node_mut(p) {
                parent_node.children.push(handle);
            }
        }

        trace!(node = %handle, parent = ?parent, "scheduled node");
        self.ready.push_back(handle);
        handle
    }

    /// Wake a node, optionally replacing its continuation.
    ///
    /// Resuming a handle whose slot has been recycled, or whose node already
    /// finished, does nothing.
    pub fn resume(&mut self, handle: NodeHandle, next: Option<Work<C>>) {
        let Some(node) = self.node_mut(handle) else {
            debug!(node = %handle, "resume of a stale node handle; ignoring");
            return;
        };
        if node.finished {
            debug!(node = %handle, "resume of a finished node; ignoring");
            return;
        }

        node.suspended = false;
        if next.is_some() {
            node.continuation = next;
        }
        // Without a continuation the node is only re-checked for finishing.
        self.ready.push_back(handle);
    }

    /// Run queued work until nothing is left to do right now.
    pub fn tick(&mut self, ctx: &mut C) {
        while let Some(handle) = self.ready.pop_front() {
            let Some(node) = self.node_mut(handle) else {
                continue;
            };
            if node.finished {
                continue;
            }
            if !self.children_finished(handle) {
                // Parked until its last child finishes and wakes it.
                continue;
            }

            let work = self.node_mut(handle).and_then(|n| n.continuation.take());
            if let Some(work) = work {
                match work(self, handle, ctx) {
                    Step::Continue(next) => {
                        if let Some(node) = self.node_mut(handle) {
                            node.continuation = Some(next);
                            self.ready.push_back(handle);
                        }
                        continue;
                    }
                    Step::Suspend => {
                        if let Some(node) = self.node_mut(handle) {
                            node.suspended = true;
                        }
                        continue;
                    }
                    Step::Done => {}
                }
            }

            let finishable = match self.node(handle) {
                Some(node) => !node.suspended && node.continuation.is_none(),
                None => false,
            };
            if finishable && self.children_finished(handle) {
                self.finish(handle);
            }
        }
    }

    /// Remove the already finished children of `handle`.
    ///
    /// For long-lived parents that keep spawning children: once the parent
    /// has observed a child's completion there is nothing left to keep.
    pub fn reap_finished_children(&mut self, handle: NodeHandle) {
        let finished: Vec<NodeHandle> = match self.node(handle) {
            Some(node) => node
                .children
                .iter()
                .copied()
                .filter(|&c| self.node(c).is_some_and(|n| n.finished))
                .collect(),
            None => return,
        };

        for child in &finished {
            self.remove_subtree(*child);
        }
        if let Some(node) = self.node_mut(handle) {
            node.children.retain(|c| !finished.contains(c));
        }
    }

    /// Whether `handle` still refers to the live occupant of its slot.
    pub fn is_live(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_some()
    }

    /// `Some(finished)` for a live handle, `None` for a stale one.
    pub fn is_finished(&self, handle: NodeHandle) -> Option<bool> {
        self.node(handle).map(|n| n.finished)
    }

    /// Number of nodes currently occupying a slot.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    fn node(&self, handle: NodeHandle) -> Option<&Node<C>> {
        let slot = self.slots.get(handle.index())?;
        if slot.version != handle.version() {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node<C>> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.version != handle.version() {
            return None;
        }
        slot.node.as_mut()
    }

    fn children_finished(&self, handle: NodeHandle) -> bool {
        match self.node(handle) {
            Some(node) => node
                .children
                .iter()
                .all(|&c| self.node(c).is_none_or(|n| n.finished)),
            None => true,
        }
    }

    fn finish(&mut self, handle: NodeHandle) {
        let parent = match self.node_mut(handle) {
            Some(node) => {
                node.finished = true;
                node.parent
            }
            None => return,
        };
        trace!(node = %handle, "node finished");

        match parent {
            None => self.remove_subtree(handle),
            Some(parent) => {
                self.remove_descendants(handle);
                let wake = self.node(parent).is_some_and(|p| !p.finished)
                    && self.children_finished(parent);
                if wake {
                    trace!(node = %parent, "last child finished; waking parent");
                    self.ready.push_back(parent);
                }
            }
        }
    }

    fn remove_subtree(&mut self, root: NodeHandle) {
        self.remove_descendants(root);
        self.free_slot(root);
    }

    /// Breadth-first removal of everything below `root`.
    fn remove_descendants(&mut self, root: NodeHandle) {
        let children = match self.node_mut(root) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };

        let mut queue: VecDeque<NodeHandle> = children.into();
        while let Some(handle) = queue.pop_front() {
            if let Some(node) = self.node_mut(handle) {
                queue.extend(node.children.drain(..));
            }
            self.free_slot(handle);
        }
    }

    fn free_slot(&mut self, handle: NodeHandle) {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };
        if slot.version != handle.version() || slot.node.is_none() {
            return;
        }
        slot.node = None;
        slot.version += 1;
        self.free.push(handle.index());
    }
}
