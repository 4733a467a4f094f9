//! The external collaborator contract: the host object/value system.
//!
//! The runtime is deliberately ignorant of what a "value" actually is — type
//! metadata, attribute storage, iteration protocols all belong to the host
//! embedding this runtime (e.g. an interpreter's object model). This module
//! pins down the narrow, unsafe trait the scheduler and capture engine need
//! from an opaque external type, nothing more.

use std::fmt;
use std::sync::Arc;

use crate::error::IsolationError;
use crate::region::Region;

/// Identity assigned by the host to one of its mutable objects.
///
/// The host owns identity assignment (mirroring e.g. `id()` in a Python-like
/// object system) rather than the runtime deriving it from a trait-object
/// pointer, since two different `Arc` allocations can legitimately represent
/// the same logical object to the host (e.g. after a move) and the host is
/// the authority on that.
pub type ObjectId = u64;

/// A value flowing through the region runtime: either an opaque host object
/// or a nested [`Region`] (regions are themselves capturable — adopted as a
/// child region rather than tagged).
#[derive(Clone)]
pub enum Value {
    Host(Arc<dyn HostValue>),
    Region(Region),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Host(v) => write!(f, "Value::Host({})", v.repr()),
            Value::Region(r) => write!(f, "Value::Region({r:?})"),
        }
    }
}

impl Value {
    /// `true` for values the capture engine never tags: the host's own
    /// immutability classification, or a region (regions are captured via
    /// parent-linking, never tagged).
    pub(crate) fn is_immutable(&self) -> bool {
        match self {
            Value::Host(v) => v.is_immutable(),
            Value::Region(_) => false,
        }
    }
}

/// Operation categories the isolation wrapper gates, used for error messages
/// and for hosts that only implement a subset of operations on a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// The contract a host mutable object must satisfy to be captured into a
/// region and operated on through an [`crate::isolation::Isolated`] wrapper.
///
/// # Safety
///
/// `object_id()` must be stable for the lifetime of the object and must not
/// collide with the id of any other live object; the tag table uses it as
/// the sole key distinguishing captured objects.
pub unsafe trait HostValue: Send + Sync {
    /// Stable identity used as the tag-table key.
    fn object_id(&self) -> ObjectId;

    /// The host type name, used in error messages and `repr`.
    fn type_name(&self) -> &str;

    /// True for values the runtime should never attempt to capture: `none`,
    /// booleans, numbers, strings, frozen aggregates of immutable elements,
    /// and so on. The runtime trusts this classification completely.
    fn is_immutable(&self) -> bool {
        false
    }

    /// Yields the elements of a sequence-like object, or `None` if this type
    /// does not support sequence iteration.
    fn iter_sequence(&self) -> Option<Vec<Value>> {
        None
    }

    /// Yields the values of a mapping-like object, or `None` if this type
    /// does not support mapping iteration.
    fn iter_mapping_values(&self) -> Option<Vec<Value>> {
        None
    }

    /// Yields the values reachable through user-defined attributes, or `None`
    /// if this type has no attribute storage.
    fn iter_attributes(&self) -> Option<Vec<Value>> {
        None
    }

    /// Textual representation, always available.
    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }

    /// Structural equality against another host value of a compatible type.
    /// `None` means this type does not define equality beyond identity.
    fn eq_value(&self, _other: &dyn HostValue) -> Option<bool> {
        None
    }

    /// Hash of the underlying value. `None` means this type is unhashable.
    fn hash_value(&self) -> Option<u64> {
        None
    }

    /// Relative ordering against another host value of a compatible type.
    /// `None` means this type does not define a total or partial order.
    fn cmp_value(&self, _other: &dyn HostValue) -> Option<std::cmp::Ordering> {
        None
    }

    /// Reads a named attribute.
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Writes a named attribute. The default rejects all writes; mutable
    /// host types override this using their own interior mutability (the
    /// isolation wrapper's `is_open` gate is this method's only caller, so a
    /// correct host implementation can assume single-writer access).
    fn set_attr(&self, name: &str, _value: Value) -> Result<(), IsolationError> {
        Err(IsolationError::UnsupportedOp {
            type_name: self.type_name().to_string(),
            op: format!("set_attr({name:?})"),
        })
    }

    /// Reads a mapping/sequence element by key or index.
    fn get_item(&self, _index: &Value) -> Option<Value> {
        None
    }

    /// Writes a mapping/sequence element by key or index.
    fn set_item(&self, index: &Value, _value: Value) -> Result<(), IsolationError> {
        let _ = index;
        Err(IsolationError::UnsupportedOp {
            type_name: self.type_name().to_string(),
            op: "set_item".to_string(),
        })
    }

    /// Binary arithmetic. `None` means the type does not define this
    /// operator.
    fn binary_op(&self, _op: BinaryOp, _rhs: &Value) -> Option<Value> {
        None
    }

    /// In-place binary arithmetic (`+=` and friends). Default dispatches
    /// through `binary_op` and `set_attr`-style mutation is left to the host;
    /// types that support true in-place mutation should override this.
    fn binary_op_assign(&self, op: BinaryOp, rhs: &Value) -> Option<Value> {
        self.binary_op(op, rhs)
    }
}
