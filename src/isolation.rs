//! The isolation wrapper: gating every externally observable operation on a
//! captured object with "is the owning region open on this thread".
//!
//! A captured value is an opaque `Arc<dyn HostValue>` that can leak anywhere
//! a `Value` clone is held, so the gate is a runtime check rather than a
//! borrow-checker guarantee: resolve the object's tag, check `is_open`,
//! delegate — a vtable-style indirection keyed by a per-object tag word.

use std::sync::Arc;

use crate::error::IsolationError;
use crate::host::{BinaryOp, HostValue, Value};
use crate::region::{self, Region, RegionInner};
use crate::{capture, tag};

impl Value {
    /// Wraps this value's host object in its [`Isolated`] gate, or `None` if
    /// the value was never captured (immutable values, and any value still
    /// waiting on its first `capture`) — those are used directly, with no
    /// wrapper installed.
    pub fn isolate(&self) -> Option<Isolated> {
        match self {
            Value::Host(host) => {
                tag::lookup(host.object_id()).map(|_| Isolated::new(host.clone()))
            }
            Value::Region(_) => None,
        }
    }
}

/// A captured object, gated through its owning region.
///
/// Every method here corresponds to one operation family the wrapper gates:
/// textual representation, equality, hashing, iteration, attribute
/// read/write, mapping/sequence subscripting, and arithmetic.
#[derive(Clone)]
pub struct Isolated {
    value: Arc<dyn HostValue>,
}

impl Isolated {
    /// Wraps an already-captured value. Panics in debug builds if the value
    /// was never captured — that would indicate a capture-engine bug, not a
    /// user error, since the wrapper is only ever installed by `capture`.
    pub(crate) fn new(value: Arc<dyn HostValue>) -> Self {
        debug_assert!(
            tag::lookup(value.object_id()).is_some(),
            "Isolated::new called on an uncaptured value"
        );
        Isolated { value }
    }

    fn owning_region(&self) -> Arc<RegionInner> {
        tag::lookup(self.value.object_id())
            .map(|owner| region::resolve(&owner))
            .expect("Isolated always wraps a captured value")
    }

    /// Checks "the owning region is open on this thread" and returns that
    /// region on success.
    fn gate(&self) -> Result<Arc<RegionInner>, IsolationError> {
        let region = self.owning_region();
        if region.is_open() {
            Ok(region)
        } else {
            Err(IsolationError::NotOpen {
                region: region.id,
                name: region.name.clone(),
            })
        }
    }

    /// Checks a single argument against the open region: already belongs to
    /// it (fine), untagged (captured into it), or belongs to someone else
    /// (rejected).
    fn gate_arg(&self, region: &Arc<RegionInner>, arg: &Value) -> Result<(), IsolationError> {
        if arg.is_immutable() {
            return Ok(());
        }
        if let Value::Host(host) = arg {
            if let Some(owner) = tag::lookup(host.object_id()) {
                let owner = region::resolve(&owner);
                return if Arc::ptr_eq(&owner, region) {
                    Ok(())
                } else {
                    Err(IsolationError::ForeignRegion {
                        region: region.id,
                        name: region.name.clone(),
                        owner: owner.id,
                        owner_name: owner.name.clone(),
                    })
                };
            }
        }
        capture::capture(region, arg)
    }

    /// Textual representation. Never fails on the host side since `repr`
    /// always has a default.
    pub fn repr(&self) -> Result<String, IsolationError> {
        self.gate()?;
        Ok(self.value.repr())
    }

    /// Structural equality against another isolated value. Both values must
    /// belong to the same open region (typically true, since equality is
    /// usually invoked from inside a behavior holding both).
    pub fn eq_value(&self, other: &Isolated) -> Result<bool, IsolationError> {
        self.gate()?;
        Ok(self.value.eq_value(other.value.as_ref()).unwrap_or(false))
    }

    /// Relative ordering against another isolated value. `UnsupportedOp` if
    /// the host type does not define one.
    pub fn compare(&self, other: &Isolated) -> Result<std::cmp::Ordering, IsolationError> {
        self.gate()?;
        self.value
            .cmp_value(other.value.as_ref())
            .ok_or_else(|| IsolationError::UnsupportedOp {
                type_name: self.value.type_name().to_string(),
                op: "compare".to_string(),
            })
    }

    /// Hash of the underlying value. Per the hashing contract, this equals
    /// the host's hash of the underlying object only while the region is
    /// open; calling it while closed fails rather than returning a stale
    /// value.
    pub fn hash_value(&self) -> Result<u64, IsolationError> {
        self.gate()?;
        self.value.hash_value().ok_or(IsolationError::UnsupportedOp {
            type_name: self.value.type_name().to_string(),
            op: "hash".to_string(),
        })
    }

    /// Iterates the value as a sequence, falling back to mapping values if
    /// the host type is a mapping and has no sequence protocol.
    pub fn iter(&self) -> Result<Vec<Value>, IsolationError> {
        self.gate()?;
        Ok(self
            .value
            .iter_sequence()
            .or_else(|| self.value.iter_mapping_values())
            .unwrap_or_default())
    }

    /// Reads a named attribute.
    pub fn get_attr(&self, name: &str) -> Result<Option<Value>, IsolationError> {
        self.gate()?;
        Ok(self.value.get_attr(name))
    }

    /// Writes a named attribute, capturing an untagged value or rejecting a
    /// foreign-owned one first.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<(), IsolationError> {
        let region = self.gate()?;
        self.gate_arg(&region, &value)?;
        self.value.set_attr(name, value)
    }

    /// Reads a mapping/sequence element.
    pub fn get_item(&self, index: &Value) -> Result<Option<Value>, IsolationError> {
        let region = self.gate()?;
        self.gate_arg(&region, index)?;
        Ok(self.value.get_item(index))
    }

    /// Writes a mapping/sequence element.
    pub fn set_item(&self, index: Value, value: Value) -> Result<(), IsolationError> {
        let region = self.gate()?;
        self.gate_arg(&region, &index)?;
        self.gate_arg(&region, &value)?;
        self.value.set_item(&index, value)
    }

    /// Binary arithmetic, e.g. `a + b`.
    pub fn binary_op(&self, op: BinaryOp, rhs: &Value) -> Result<Value, IsolationError> {
        let region = self.gate()?;
        self.gate_arg(&region, rhs)?;
        self.value
            .binary_op(op, rhs)
            .ok_or(IsolationError::UnsupportedOp {
                type_name: self.value.type_name().to_string(),
                op: op.to_string(),
            })
    }

    /// In-place binary arithmetic, e.g. `a += b`.
    pub fn binary_op_assign(&self, op: BinaryOp, rhs: &Value) -> Result<Value, IsolationError> {
        let region = self.gate()?;
        self.gate_arg(&region, rhs)?;
        self.value
            .binary_op_assign(op, rhs)
            .ok_or(IsolationError::UnsupportedOp {
                type_name: self.value.type_name().to_string(),
                op: format!("{op}="),
            })
    }

    /// Returns the owning region without gating.
    pub fn region_handle(&self) -> Region {
        Region {
            inner: self.owning_region(),
        }
    }
}
