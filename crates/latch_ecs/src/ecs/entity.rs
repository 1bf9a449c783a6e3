//! Entity identity
//!
//! Entities are opaque 64-bit ids. Equality and hashing use the raw value
//! only; where the entity's data lives is tracked by the `EntityManager`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Entity handle.
///
/// The value `0` is reserved as the invalid entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u64);

impl Entity {
    pub const INVALID: Entity = Entity(0);

    /// Serialize to 64-bit integer (for save files and records)
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0
    }

    /// Deserialize from 64-bit integer
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supplies fresh 64-bit ids for entities created without an explicit id.
pub trait UuidSource: Send + Sync {
    /// Return a non-zero id. Values may repeat; the manager skips ids in use.
    fn next_uuid(&self) -> u64;
}

/// Monotonic id source starting at 1.
#[derive(Debug)]
pub struct SequentialUuidSource {
    next: AtomicU64,
}

impl SequentialUuidSource {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }
}

impl Default for SequentialUuidSource {
    fn default() -> Self {
        Self::new()
    }
}

impl UuidSource for SequentialUuidSource {
    fn next_uuid(&self) -> u64 {
        loop {
            let value = self.next.fetch_add(1, Ordering::Relaxed);
            if value != 0 {
                return value;
            }
        }
    }
}
