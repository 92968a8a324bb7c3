//! # Reorder Stage
//!
//! Turns chunk payloads that arrive in completion order back into strict
//! index order. The buffer is owned by the single coordinator thread; workers
//! only ever talk to it through the result channel.

use std::collections::HashMap;

use tracing::warn;

#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next_index: u64,
    pending: HashMap<u64, Vec<u8>>,
    max_pending: usize,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next emitted payload must carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Payloads held back waiting for a predecessor.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Largest number of payloads held at once so far.
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Accept the payload for `index` and hand every payload that is now
    /// contiguous to `emit`, in order. Returns how many were emitted.
    ///
    /// If `emit` fails, the buffer stops at the failing payload and the error
    /// is returned; nothing after it is emitted.
    pub fn push<E, F>(&mut self, index: u64, payload: Vec<u8>, mut emit: F) -> Result<usize, E>
    where
        F: FnMut(u64, &[u8]) -> Result<(), E>,
    {
        if index < self.next_index || self.pending.contains_key(&index) {
            warn!("ignoring duplicate payload for chunk {index}");
            return Ok(0);
        }
        if index != self.next_index {
            self.pending.insert(index, payload);
            self.max_pending = self.max_pending.max(self.pending.len());
            return Ok(0);
        }

        emit(index, &payload)?;
        self.next_index += 1;
        let mut emitted = 1;
        while let Some(next) = self.pending.remove(&self.next_index) {
            emit(self.next_index, &next)?;
            self.next_index += 1;
            emitted += 1;
        }
        Ok(emitted)
    }
}
