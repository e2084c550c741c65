//! Resource Handles
//!
//! A [`ResourceHandle`] is an opaque 32-bit key derived from a stable hash of
//! a name or of descriptor content. It carries no ownership: it may point at a
//! slot that is queued, resident, failed, or long gone. The value `0` is the
//! universal invalid sentinel.
//!
//! Content-derived handles make deduplication free: two call sites that
//! describe the same thing compute the same key and coalesce onto one slot.

use std::fmt;
use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::{Xxh3, xxh3_64, xxh3_64_with_seed};

/// Seed used when deriving child handles (e.g. render-target attachments).
const DERIVE_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Opaque, copyable, content-derived resource key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    /// The invalid sentinel.
    pub const INVALID: Self = Self(0);

    /// Hashes a human-readable name into a handle.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::from_hash(xxh3_64(name.as_bytes()))
    }

    /// Folds a 64-bit hash into a handle, never producing [`Self::INVALID`].
    #[inline]
    #[must_use]
    pub fn from_hash(hash: u64) -> Self {
        let folded = (hash ^ (hash >> 32)) as u32;
        Self(folded.max(1))
    }

    /// Wraps a raw value. `0` yields the invalid handle.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `false` only for the sentinel value.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Derives a stable child handle, e.g. the `index`-th attachment of a
    /// render target.
    #[must_use]
    pub fn derive(self, index: u32) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.0.to_le_bytes());
        bytes[4..].copy_from_slice(&index.to_le_bytes());
        Self::from_hash(xxh3_64_with_seed(&bytes, DERIVE_SEED))
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ResourceHandle({:#010x})", self.0)
        } else {
            f.write_str("ResourceHandle(INVALID)")
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

/// Rolling content hasher for structural handles.
///
/// Every value folded in advances the xxh3 state, so the resulting handle
/// depends on both the content and its order.
pub struct HandleHasher {
    state: Xxh3,
}

impl HandleHasher {
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Xxh3::with_seed(seed),
        }
    }

    /// Folds any hashable value into the running state.
    pub fn fold<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash(&mut self.state);
        self
    }

    #[must_use]
    pub fn finish(&self) -> ResourceHandle {
        ResourceHandle::from_hash(self.state.finish())
    }
}
