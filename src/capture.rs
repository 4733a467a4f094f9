//! Object capture: transitively tagging a value's reachable mutable graph
//! with an owning region.
//!
//! Recursion terminates the moment it revisits an object already tagged
//! with the region doing the capturing, so cyclic object graphs are safe;
//! each recursive step checks the tag table before committing its own.

use std::sync::Arc;

use log::trace;

use crate::error::IsolationError;
use crate::host::Value;
use crate::region::RegionInner;
use crate::tag;

/// Captures `value` (and everything reachable from it) into `region`.
///
/// Walks the capture cases in order: immutable/already-owned short-circuit,
/// foreign-owner rejection, nested-region adoption, then transitive descent
/// into the value's reachable content. Not atomic against other
/// captures racing from the *same* region (impossible by construction: the
/// owning worker holds the region open, so there is exactly one caller), but
/// safe against concurrent captures from other regions racing on the same
/// previously-uncaptured object, via [`tag::publish`]'s compare-and-set.
pub(crate) fn capture(region: &Arc<RegionInner>, value: &Value) -> Result<(), IsolationError> {
    match value {
        Value::Host(host) => {
            if host.is_immutable() {
                return Ok(());
            }

            if let Some(owner) = tag::lookup(host.object_id()) {
                let owner = crate::region::resolve(&owner);
                if Arc::ptr_eq(&owner, region) {
                    return Ok(());
                }
                return Err(IsolationError::AlreadyCaptured {
                    owner: owner.id,
                    owner_name: owner.name.clone(),
                });
            }

            // Recurse into the transitive content *before* publishing our own
            // tag, so that a cyclic graph terminates the moment it revisits
            // an object this exact call already tagged (case 1 above catches
            // it on the recursive call) rather than looping forever.
            for child in host
                .iter_sequence()
                .into_iter()
                .chain(host.iter_mapping_values())
                .chain(host.iter_attributes())
                .flatten()
            {
                capture(region, &child)?;
            }

            match tag::publish(host.object_id(), region.clone()) {
                Ok(()) => {
                    trace!(
                        "captured object {} (type {:?}) into region {}",
                        host.object_id(),
                        host.type_name(),
                        region.id
                    );
                    Ok(())
                }
                Err(winner) => {
                    let winner = crate::region::resolve(&winner);
                    if Arc::ptr_eq(&winner, region) {
                        Ok(())
                    } else {
                        Err(IsolationError::AlreadyCaptured {
                            owner: winner.id,
                            owner_name: winner.name.clone(),
                        })
                    }
                }
            }
        }

        Value::Region(child) => {
            let child_resolved = crate::region::resolve(&child.inner);
            if child_resolved.is_free() {
                child.set_parent(region);
                trace!("adopted free region {} under {}", child_resolved.id, region.id);
                return Ok(());
            }
            let owning_region = crate::region::Region {
                inner: region.clone(),
            };
            if owning_region.owns(&child_resolved) {
                return Ok(());
            }
            Err(IsolationError::ForeignRegionGraph {
                child: child_resolved.id,
                child_name: child_resolved.name.clone(),
                root: region.id,
            })
        }
    }
}

/// Used by `merge`/`detach_all` to move an already-captured value's tag
/// wholesale to a different region, bypassing the normal capture checks
/// (the value is known-owned already; this is a relocation, not a first
/// capture).
pub(crate) fn retarget(value: &Value, region: &Arc<RegionInner>) {
    match value {
        Value::Host(host) => tag::retarget(host.object_id(), region.clone()),
        Value::Region(child) => child.set_parent(region),
    }
}
