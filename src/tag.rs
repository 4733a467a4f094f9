//! The object tag table: `object -> owning region`.
//!
//! Two lookup paths exist: a per-worker cache (fast) and a global table
//! (authoritative, and where the compare-and-set that arbitrates concurrent
//! captures happens) — a read-lock fast path, and a write-lock plus `Entry`
//! API to resolve the race against a concurrent writer that got there first.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};

use log::trace;
use once_cell::sync::Lazy;

use crate::host::ObjectId;
use crate::region::RegionInner;

static GLOBAL_TAGS: Lazy<RwLock<HashMap<ObjectId, Arc<RegionInner>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

thread_local! {
    static LOCAL_CACHE: RefCell<HashMap<ObjectId, Arc<RegionInner>>> = RefCell::new(HashMap::new());
}

/// Looks up the region currently tagging `id`, consulting the worker-local
/// cache first and falling back to (and seeding from) the global table.
///
/// A stale local entry can only reflect an `alias` change on the cached
/// region, which [`crate::region::resolve`] heals — callers resolve the
/// returned region before trusting its identity.
pub(crate) fn lookup(id: ObjectId) -> Option<Arc<RegionInner>> {
    if let Some(hit) = LOCAL_CACHE.with(|c| c.borrow().get(&id).cloned()) {
        return Some(hit);
    }
    let hit = GLOBAL_TAGS.read().unwrap().get(&id).cloned()?;
    LOCAL_CACHE.with(|c| c.borrow_mut().insert(id, hit.clone()));
    Some(hit)
}

/// Publishes a brand-new tag for `id`, or reports the region that won a
/// concurrent race to tag the same object first.
///
/// Arbitrates the race with a write-locked `Entry` check rather than a
/// literal lock-free CAS — the outcome is the same: exactly one caller's
/// tag wins, everyone else learns who won.
pub(crate) fn publish(id: ObjectId, region: Arc<RegionInner>) -> Result<(), Arc<RegionInner>> {
    let mut table = GLOBAL_TAGS.write().unwrap();
    match table.entry(id) {
        Entry::Occupied(existing) => Err(existing.get().clone()),
        Entry::Vacant(slot) => {
            trace!("tagged object {id} with region {}", region.id);
            slot.insert(region.clone());
            LOCAL_CACHE.with(|c| c.borrow_mut().insert(id, region));
            Ok(())
        }
    }
}

/// Unconditionally retargets `id` to `new_region`, used by `merge` and
/// `detach_all` when objects move wholesale to a different region.
pub(crate) fn retarget(id: ObjectId, new_region: Arc<RegionInner>) {
    trace!("retargeted object {id} to region {}", new_region.id);
    GLOBAL_TAGS.write().unwrap().insert(id, new_region.clone());
    LOCAL_CACHE.with(|c| c.borrow_mut().insert(id, new_region));
}

/// Clears every tag, used by `detach_all`'s "clear tags on detach_all" rule
/// is actually a retarget, not an unconditional clear (see `retarget`); this
/// helper is reserved for tests that need a clean global table between runs.
#[cfg(test)]
pub(crate) fn clear_all_for_test() {
    GLOBAL_TAGS.write().unwrap().clear();
    LOCAL_CACHE.with(|c| c.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn publish_then_lookup_round_trips() {
        clear_all_for_test();
        let r = Region::new(Some("t"));
        assert!(publish(1, r.inner.clone()).is_ok());
        let found = lookup(1).unwrap();
        assert_eq!(found.id, r.inner.id);
    }

    #[test]
    fn second_publish_loses_the_race() {
        clear_all_for_test();
        let r1 = Region::new(Some("r1"));
        let r2 = Region::new(Some("r2"));
        assert!(publish(2, r1.inner.clone()).is_ok());
        let err = publish(2, r2.inner.clone()).unwrap_err();
        assert_eq!(err.id, r1.inner.id);
    }
}
