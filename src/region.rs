//! Regions: the ownership root for a set of mutable objects.
//!
//! `RegionInner` holds a named-object map plus alias/parent bookkeeping plus
//! the `last` scheduling cursor consulted by the behavior chain. `Region` is
//! the cheap-to-clone public handle wrapping it.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use crate::behavior::Request;
use crate::capture;
use crate::error::IsolationError;
use crate::host::Value;
use crate::region_id::RegionId;

/// The internal, reference-counted state of a region.
///
/// Per the concurrency model, `objects`, `alias`, and `parent` are touched
/// only by construction or by the single worker holding the region open;
/// `is_open`, `is_shared`, and `last` are atomics precisely because they may
/// be observed (not mutated, for the first two) from other threads racing to
/// check isolation.
pub struct RegionInner {
    pub(crate) id: RegionId,
    pub(crate) name: String,
    /// Self-pointer forming a forest of region aliases. `None` means this
    /// region is its own representative.
    alias: Mutex<Option<Arc<RegionInner>>>,
    /// `None` iff this region is free.
    pub(crate) parent: Mutex<Option<Arc<RegionInner>>>,
    is_open: AtomicBool,
    is_shared: AtomicBool,
    pub(crate) objects: Mutex<HashMap<String, Value>>,
    /// Tail of this region's behavior wait-chain; see [`crate::behavior`].
    pub(crate) last: AtomicPtr<Request>,
}

impl RegionInner {
    /// `true` iff this exact node (no alias resolution) has no parent.
    pub(crate) fn is_free(&self) -> bool {
        self.parent.lock().unwrap().is_none()
    }

    /// `true` iff this exact node is currently open. Callers that may be
    /// looking at a stale (pre-resolution) node should `resolve` first.
    pub(crate) fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for RegionInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionInner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_open", &self.is_open.load(Ordering::Relaxed))
            .field("is_shared", &self.is_shared.load(Ordering::Relaxed))
            .finish()
    }
}

/// Follows `region`'s alias chain to its representative, path-compressing
/// every traversed hop so later calls are O(1).
///
/// Classical union-find `find`: walk the chain, then rewrite every visited
/// node to point directly at the root.
pub(crate) fn resolve(region: &Arc<RegionInner>) -> Arc<RegionInner> {
    let next = region.alias.lock().unwrap().clone();
    let Some(next) = next else {
        return region.clone();
    };
    let root = resolve(&next);
    if !Arc::ptr_eq(&next, &root) {
        *region.alias.lock().unwrap() = Some(root.clone());
    }
    root
}

/// A merge view returned by [`Region::merge`], letting the caller read back
/// which region now owns what was merged away.
#[derive(Debug, Clone)]
pub struct MergeView {
    pub region: Region,
}

/// Public handle to a region. Cheap to clone (an `Arc` bump); equality and
/// hashing both resolve aliases first, so a region and any alias that has
/// since been merged into it compare and hash identically.
#[derive(Clone)]
pub struct Region {
    pub(crate) inner: Arc<RegionInner>,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = resolve(&self.inner);
        write!(f, "Region(id={}, name={:?})", r.id, r.name)
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        resolve(&self.inner).id == resolve(&other.inner).id
    }
}
impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        resolve(&self.inner).id.hash(state);
    }
}

impl Region {
    /// Creates a fresh, free, unshared, closed region.
    pub fn new(name: Option<&str>) -> Self {
        let id = RegionId::fresh();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("region_{id}"));
        debug!("created region {id} ({name:?})");
        Region {
            inner: Arc::new(RegionInner {
                id,
                name,
                alias: Mutex::new(None),
                parent: Mutex::new(None),
                is_open: AtomicBool::new(false),
                is_shared: AtomicBool::new(false),
                objects: Mutex::new(HashMap::new()),
                last: AtomicPtr::new(ptr::null_mut()),
            }),
        }
    }

    pub fn id(&self) -> RegionId {
        resolve(&self.inner).id
    }

    pub fn name(&self) -> String {
        resolve(&self.inner).name.clone()
    }

    pub fn is_open(&self) -> bool {
        resolve(&self.inner).is_open.load(Ordering::SeqCst)
    }

    pub fn is_shared(&self) -> bool {
        resolve(&self.inner).is_shared.load(Ordering::SeqCst)
    }

    /// `true` iff this region (after alias resolution) has no parent.
    pub fn is_free(&self) -> bool {
        resolve(&self.inner).parent.lock().unwrap().is_none()
    }

    /// Opens the region: `is_open` becomes `true`. Called by the scheduler
    /// around a behavior's thunk, and callable directly by user code that
    /// wants to inspect or seed a region before it is ever shared. Nesting
    /// on the same thread is not supported (opening an already-open region
    /// just leaves it open).
    pub fn open(&self) {
        let r = resolve(&self.inner);
        trace!("region {} open", r.id);
        r.is_open.store(true, Ordering::SeqCst);
        crate::when::mark_open(r.id);
    }

    /// Closes the region: `is_open` becomes `false`.
    pub fn close(&self) {
        let r = resolve(&self.inner);
        trace!("region {} close", r.id);
        r.is_open.store(false, Ordering::SeqCst);
        crate::when::mark_closed(r.id);
    }

    /// Stores `value` under `name`, capturing it into this region first.
    /// Fails if the region is not open, or if `value` is already captured by
    /// a different region.
    pub fn set(&self, name: &str, value: Value) -> Result<(), IsolationError> {
        let r = resolve(&self.inner);
        if !r.is_open.load(Ordering::SeqCst) {
            return Err(IsolationError::NotOpen {
                region: r.id,
                name: r.name.clone(),
            });
        }
        capture::capture(&r, &value)?;
        r.objects.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    /// Retrieves the root stored under `name`. Fails if the region is not
    /// open or the root does not exist.
    pub fn get(&self, name: &str) -> Result<Value, IsolationError> {
        let r = resolve(&self.inner);
        if !r.is_open.load(Ordering::SeqCst) {
            return Err(IsolationError::NotOpen {
                region: r.id,
                name: r.name.clone(),
            });
        }
        r.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| IsolationError::NoSuchRoot {
                region: r.id,
                name: r.name.clone(),
                key: name.to_string(),
            })
    }

    /// Merges `other` into `self`: `other` becomes an alias of `self` and its
    /// objects are moved into `self`. `self` must be open and free; `other`
    /// must be free.
    pub fn merge(&self, other: &Region) -> Result<MergeView, IsolationError> {
        let self_r = resolve(&self.inner);
        if !self_r.is_open.load(Ordering::SeqCst) {
            return Err(IsolationError::MergeTargetNotOpen {
                region: self_r.id,
                name: self_r.name.clone(),
            });
        }
        if self_r.parent.lock().unwrap().is_some() {
            return Err(IsolationError::NotFree {
                region: self_r.id,
                name: self_r.name.clone(),
            });
        }
        let other_r = resolve(&other.inner);
        if Arc::ptr_eq(&self_r, &other_r) {
            return Err(IsolationError::NotFree {
                region: other_r.id,
                name: other_r.name.clone(),
            });
        }
        if other_r.parent.lock().unwrap().is_some() {
            return Err(IsolationError::ForeignRegionGraph {
                child: other_r.id,
                child_name: other_r.name.clone(),
                root: self_r.id,
            });
        }

        let moved = std::mem::take(&mut *other_r.objects.lock().unwrap());
        for value in moved.values() {
            capture::retarget(value, &self_r);
        }
        self_r.objects.lock().unwrap().extend(moved);
        *other_r.alias.lock().unwrap() = Some(self_r.clone());
        debug!("merged region {} into {}", other_r.id, self_r.id);

        Ok(MergeView {
            region: Region { inner: self_r },
        })
    }

    /// One-way transition to shareable: once `true`, never reverts. Idempotent.
    pub fn make_shareable(&self) {
        let r = resolve(&self.inner);
        if !r.is_shared.swap(true, Ordering::SeqCst) {
            debug!("region {} made shareable", r.id);
            r.last.store(ptr::null_mut(), Ordering::SeqCst);
        }
    }

    /// Atomically swaps this region's `objects` map into a fresh detached
    /// region, retargeting the tags of every moved object. Requires the
    /// region to be open and shared.
    pub fn detach_all(&self) -> Result<Region, IsolationError> {
        let r = resolve(&self.inner);
        if !r.is_open.load(Ordering::SeqCst) || !r.is_shared.load(Ordering::SeqCst) {
            return Err(IsolationError::DetachNotAllowed {
                region: r.id,
                name: r.name.clone(),
            });
        }
        let detached = Region::new(Some(&format!("{}_detached", r.name)));
        let moved = std::mem::take(&mut *r.objects.lock().unwrap());
        for value in moved.values() {
            capture::retarget(value, &detached.inner);
        }
        *detached.inner.objects.lock().unwrap() = moved;
        debug!("detached all objects of region {} into {}", r.id, detached.inner.id);
        Ok(detached)
    }

    /// Returns the tag (owning region) without gating.
    pub fn region_handle(&self) -> Region {
        Region {
            inner: resolve(&self.inner),
        }
    }

    /// `true` iff `self` (after resolving) is an ancestor of, or identical
    /// to, `child` — walking `parent` links.
    pub(crate) fn owns(&self, child: &Arc<RegionInner>) -> bool {
        let self_r = resolve(&self.inner);
        let mut cur = resolve(child);
        loop {
            if Arc::ptr_eq(&cur, &self_r) {
                return true;
            }
            let parent = cur.parent.lock().unwrap().clone();
            match parent {
                Some(p) => cur = resolve(&p),
                None => return false,
            }
        }
    }

    pub(crate) fn set_parent(&self, parent: &Arc<RegionInner>) {
        *resolve(&self.inner).parent.lock().unwrap() = Some(parent.clone());
    }
}
