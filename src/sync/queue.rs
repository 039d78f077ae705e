use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};

/// Min-priority queue of block numbers fed by a head watcher
///
/// The lowest pending number is always taken first so a consumer that falls behind
/// catches up in order.
#[derive(Default)]
pub struct BlockQueue {
    heap: Mutex<BinaryHeap<Reverse<u64>>>,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, number: u64) {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Reverse(number));
    }

    pub fn pop(&self) -> Option<u64> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .map(|Reverse(n)| n)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_lowest_first() {
        let queue = BlockQueue::new();
        for n in [12, 10, 15, 11, 10] {
            queue.push(n);
        }
        let drained: Vec<u64> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![10, 10, 11, 12, 15]);
        assert!(queue.is_empty());
    }
}
