use std::collections::VecDeque;

use crate::error::{Result, TieringError};

/// Process-local ring. Content is lost when the process exits.
#[derive(Debug)]
pub(super) struct LocalRing {
    slots: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl LocalRing {
    pub(super) fn allocate(label: &str, capacity: usize) -> Result<Self> {
        let mut slots = VecDeque::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|err| TieringError::Allocation {
                queue: label.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { slots, capacity })
    }

    pub(super) fn push(&mut self, bytes: &[u8]) -> bool {
        if self.slots.len() >= self.capacity {
            return false;
        }
        self.slots.push_back(bytes.to_vec());
        true
    }

    pub(super) fn pop(&mut self) -> Option<Vec<u8>> {
        self.slots.pop_front()
    }

    pub(super) fn len(&self) -> usize {
        self.slots.len()
    }
}
