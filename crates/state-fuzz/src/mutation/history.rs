use indexmap::IndexSet;

/// Default bound on the digest history.
pub const MAX_HISTORY_SIZE: usize = 1000;

/// 128-bit digest of a mutated input.
pub type Digest = [u8; 16];

pub fn digest_of(data: &[u8]) -> Digest {
    let hash = blake3::hash(data);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hash.as_bytes()[..16]);
    digest
}

/// Bounded set of recently emitted digests. Holds digests only, never
/// inputs. Eviction is FIFO, oldest first.
#[derive(Debug)]
pub struct MutationHistory {
    digests: IndexSet<Digest>,
    capacity: usize,
}

impl MutationHistory {
    pub fn new() -> Self {
        Self::bounded(MAX_HISTORY_SIZE)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            digests: IndexSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a digest. Returns `true` when it was not in the history,
    /// evicting the oldest entry if the bound is reached.
    pub fn observe(&mut self, digest: Digest) -> bool {
        if self.digests.contains(&digest) {
            return false;
        }
        if self.digests.len() >= self.capacity {
            self.digests.shift_remove_index(0);
        }
        self.digests.insert(digest);
        true
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.digests.contains(digest)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl Default for MutationHistory {
    fn default() -> Self {
        Self::new()
    }
}
