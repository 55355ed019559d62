//! Fixed membership ring with a shared round-robin cursor.
//!
//! A [`NodeRing`] holds the ordered replica list for the lifetime of the
//! process. The only mutable state is the cursor, advanced with a single
//! atomic `fetch_add`, so any number of tasks can pick nodes concurrently
//! without locking and without two callers ever observing the same advance.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Error constructing a ring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// A ring needs at least one member.
    #[error("node ring requires at least one node")]
    Empty,
}

/// Ordered, immutable list of nodes with an atomically advancing cursor.
///
/// # Examples
///
/// ```
/// use hopper_core::NodeRing;
///
/// let ring = NodeRing::new(vec!["a", "b", "c"]).expect("non-empty");
/// assert_eq!(*ring.current_node(), "a");
/// assert_eq!(*ring.next_node(), "b");
/// assert_eq!(*ring.next_node(), "c");
/// assert_eq!(*ring.next_node(), "a");
/// ```
#[derive(Debug)]
pub struct NodeRing<T> {
    nodes: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> NodeRing<T> {
    /// Build a ring from an ordered node list.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Empty`] if `nodes` is empty.
    pub fn new(nodes: Vec<T>) -> Result<Self, RingError> {
        if nodes.is_empty() {
            return Err(RingError::Empty);
        }
        Ok(Self {
            nodes,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Node under the cursor. Does not advance.
    pub fn current_node(&self) -> &T {
        let index = self.cursor.load(Ordering::Acquire) % self.nodes.len();
        &self.nodes[index]
    }

    /// Advance the cursor by one and return the new current node.
    ///
    /// Calling this again after a failed request skips to the following
    /// node, which is how callers fail over.
    pub fn next_node(&self) -> &T {
        let previous = self.cursor.fetch_add(1, Ordering::AcqRel);
        let index = previous.wrapping_add(1) % self.nodes.len();
        &self.nodes[index]
    }

    /// Iterate over one full lap starting at the current node, without
    /// touching the shared cursor.
    pub fn iter_from_current(&self) -> impl Iterator<Item = &T> + '_ {
        let start = self.cursor.load(Ordering::Acquire) % self.nodes.len();
        self.nodes[start..].iter().chain(self.nodes[..start].iter())
    }

    /// All nodes in configured order.
    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    /// Number of nodes; never zero.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: construction rejects empty rings.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<T: PartialEq> NodeRing<T> {
    /// Position of `node` in configured order.
    pub fn position(&self, node: &T) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }
}
