//! Prioritized task queue: `pop` yields the highest-priority item that is
//! currently available; ties within a priority resolve FIFO. Starvation of
//! lower priorities under sustained High-priority load is permitted by the
//! spec and is an accepted operator tradeoff, not a bug.

use super::mpmc::MpmcQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

pub struct PriorityQueue<T> {
    high: MpmcQueue<T>,
    medium: MpmcQueue<T>,
    low: MpmcQueue<T>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            high: MpmcQueue::new(),
            medium: MpmcQueue::new(),
            low: MpmcQueue::new(),
        }
    }

    pub fn push(&self, item: T, priority: Priority) {
        match priority {
            Priority::High => self.high.push(item),
            Priority::Medium => self.medium.push(item),
            Priority::Low => self.low.push(item),
        }
    }

    /// Pops the highest-available-priority item, scanning High, then
    /// Medium, then Low.
    pub fn pop(&self) -> Option<T> {
        self.high
            .pop()
            .or_else(|| self.medium.pop())
            .or_else(|| self.low.pop())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
