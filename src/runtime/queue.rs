use crate::runtime::fiber::FiberId;

use std::collections::VecDeque;

/// The launcher's ready-list.
///
/// `RunQueue` stores the fibers that are waiting to be dispatched, in the
/// order they became runnable. Fibers are pushed to the back and popped from
/// the front (FIFO).
///
/// The queue itself does not deduplicate: the launcher only pushes a fiber
/// after flipping its `scheduled` flag, which is what keeps every fiber in
/// here at most once and keeps the active fiber out of it.
pub(crate) struct RunQueue {
    inner: VecDeque<FiberId>,
}

impl RunQueue {
    /// Creates an empty run queue.
    pub(crate) fn new() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }

    /// Appends a fiber to the back of the queue.
    pub(crate) fn push(&mut self, fiber: FiberId) {
        debug_assert!(
            !self.inner.contains(&fiber),
            "fiber {fiber} queued twice"
        );

        self.inner.push_back(fiber);
    }

    /// Pops the fiber at the front of the queue.
    ///
    /// Returns `None` if the queue is empty.
    pub(crate) fn pop(&mut self) -> Option<FiberId> {
        self.inner.pop_front()
    }

    /// The fiber that the next [`pop`](Self::pop) returns.
    pub(crate) fn front(&self) -> Option<FiberId> {
        self.inner.front().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
