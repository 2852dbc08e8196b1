//! Priority ordering for queued movers
//!
//! Movers are compared first by priority (higher wins), then by creation
//! time. The tie-break direction is a property of the queue: FIFO queues
//! dispatch equal-priority movers oldest-first (fairness), LIFO queues
//! newest-first (latency).

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scheduler::JobEntry;

/// Tie-break order among equal-priority movers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueueOrder {
    /// Oldest equal-priority mover dispatches first
    #[default]
    Fifo,
    /// Newest equal-priority mover dispatches first
    Lifo,
}

/// Heap element wrapping an admitted mover with its queue's ordering mode.
///
/// `BinaryHeap` pops the maximum, so `Ord` is arranged such that the mover
/// that must dispatch next compares greatest.
#[derive(Clone)]
pub(crate) struct PrioritizedMover {
    pub(crate) entry: Arc<JobEntry>,
    order: QueueOrder,
}

impl PrioritizedMover {
    pub(crate) fn new(entry: Arc<JobEntry>, order: QueueOrder) -> Self {
        Self { entry, order }
    }
}

impl PartialEq for PrioritizedMover {
    fn eq(&self, other: &Self) -> bool {
        self.entry.id == other.entry.id
    }
}

impl Eq for PrioritizedMover {}

impl PartialOrd for PrioritizedMover {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedMover {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_priority = self.entry.priority.cmp(&other.entry.priority);
        match self.order {
            // FIFO: older creation time wins the tie, so older compares greater
            QueueOrder::Fifo => by_priority
                .then_with(|| other.entry.created.cmp(&self.entry.created))
                .then_with(|| other.entry.id.cmp(&self.entry.id)),
            // LIFO: newer creation time wins the tie
            QueueOrder::Lifo => by_priority
                .then_with(|| self.entry.created.cmp(&other.entry.created))
                .then_with(|| self.entry.id.cmp(&other.entry.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mover::{CancelToken, Mover, MoverId, Priority};
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::BinaryHeap;

    struct NoopMover;

    #[async_trait]
    impl Mover for NoopMover {
        async fn execute(&self, _cancel: CancelToken) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn set_failure(&self, _code: i32, _message: &str) {}

        fn bytes_transferred(&self) -> u64 {
            0
        }
    }

    fn entry(seq: u32, priority: Priority) -> Arc<JobEntry> {
        Arc::new(JobEntry::new(
            MoverId::new(0, seq),
            Arc::new(NoopMover),
            priority,
        ))
    }

    fn pop_order(order: QueueOrder, entries: Vec<Arc<JobEntry>>) -> Vec<u32> {
        let mut heap = BinaryHeap::new();
        for e in entries {
            heap.push(PrioritizedMover::new(e, order));
        }
        let mut out = Vec::new();
        while let Some(p) = heap.pop() {
            out.push(p.entry.id.sequence());
        }
        out
    }

    #[test]
    fn test_priority_beats_submission_order() {
        let order = pop_order(
            QueueOrder::Fifo,
            vec![
                entry(1, Priority::Low),
                entry(2, Priority::High),
                entry(3, Priority::Regular),
            ],
        );
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_fifo_tie_break_oldest_first() {
        let order = pop_order(
            QueueOrder::Fifo,
            vec![
                entry(1, Priority::Regular),
                entry(2, Priority::Regular),
                entry(3, Priority::Regular),
            ],
        );
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_lifo_tie_break_newest_first() {
        let order = pop_order(
            QueueOrder::Lifo,
            vec![
                entry(1, Priority::Regular),
                entry(2, Priority::Regular),
                entry(3, Priority::Regular),
            ],
        );
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_lifo_priority_still_wins() {
        let order = pop_order(
            QueueOrder::Lifo,
            vec![entry(1, Priority::High), entry(2, Priority::Low)],
        );
        assert_eq!(order, vec![1, 2]);
    }
}
