//! Pooled fixed-size byte buffers with owned leases.
//!
//! Buffers are handed out as RAII leases so release happens on every
//! exit path, including early return from a failed pass. The arena is
//! the one resource shared across concurrent passes (a background
//! tiling build and a foreground preview, say), so checkout goes
//! through a coarse lock; the leased buffer itself is exclusively owned
//! until dropped.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Default lease size: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

#[derive(Default)]
struct ArenaState {
    free: Vec<Vec<u8>>,
    outstanding_by_owner: HashMap<String, usize>,
    outstanding: usize,
}

struct ArenaInner {
    buffer_size: usize,
    state: Mutex<ArenaState>,
}

/// A pool of equally sized byte buffers.
pub struct BufferArena {
    inner: Arc<ArenaInner>,
}

impl BufferArena {
    pub fn new(buffer_size: usize) -> Self {
        assert!(buffer_size > 0);
        Self {
            inner: Arc::new(ArenaInner {
                buffer_size,
                state: Mutex::new(ArenaState::default()),
            }),
        }
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Checks out one buffer under the given owner identity. The owner
    /// tag exists for leak diagnostics only.
    pub fn acquire(&self, owner: &str) -> BufferLease {
        let data = {
            let mut state = self.inner.state.lock().unwrap();
            state.outstanding += 1;
            *state.outstanding_by_owner.entry(owner.to_string()).or_insert(0) += 1;
            state.free.pop()
        };
        let data = data.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        debug_assert_eq!(data.len(), self.inner.buffer_size);

        BufferLease {
            data,
            owner: owner.to_string(),
            arena: Arc::clone(&self.inner),
        }
    }

    /// Total buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().unwrap().outstanding
    }

    pub fn outstanding_for(&self, owner: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .outstanding_by_owner
            .get(owner)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        let state = self.inner.state.lock().unwrap();
        if state.outstanding != 0 && !std::thread::panicking() {
            let owners: Vec<_> = state
                .outstanding_by_owner
                .iter()
                .filter(|(_, &n)| n > 0)
                .map(|(o, n)| format!("{o}: {n}"))
                .collect();
            drop(state);
            panic!("buffer arena dropped with outstanding leases ({})", owners.join(", "));
        }
    }
}

/// An exclusively owned buffer checked out from a `BufferArena`.
/// Returns itself to the pool on drop; it cannot be released twice.
pub struct BufferLease {
    data: Vec<u8>,
    owner: String,
    arena: Arc<ArenaInner>,
}

impl BufferLease {
    /// The largest byte count that holds whole records of `record_size`.
    #[inline]
    pub fn usable_bytes(&self, record_size: usize) -> usize {
        (self.data.len() / record_size) * record_size
    }
}

impl Deref for BufferLease {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BufferLease {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        let mut state = self.arena.state.lock().unwrap();
        state.outstanding -= 1;
        if let Some(n) = state.outstanding_by_owner.get_mut(&self.owner) {
            *n -= 1;
        }
        state.free.push(std::mem::take(&mut self.data));
    }
}
