//! Stable, process-global region identity.
//!
//! A monotonically increasing numeric id keeps regions comparable even
//! after a region's `Arc` is dropped and a later allocation happens to
//! reuse the same address, so ids are handed out from a single
//! process-wide counter rather than derived from pointer identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// A stable, monotonically increasing region identifier.
///
/// Ids are unique for the lifetime of the process; they are never reused,
/// even after a region (and its `Arc<RegionInner>`) is dropped. This is what
/// lets [`crate::behavior::Request`] sort requests into a total order that
/// does not depend on allocator behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(u64);

impl RegionId {
    /// Allocates a fresh, never-before-used region id.
    pub(crate) fn fresh() -> Self {
        // Relaxed: the only property we need is that concurrent callers never
        // observe the same value, which `fetch_add` guarantees regardless of
        // ordering.
        RegionId(NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, exposed for logging and hashing purposes.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
