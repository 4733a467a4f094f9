//! Integration tests exercising the region/behavior scheduler end to end,
//! against a small host object system built only for these tests.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use boc_regions::{when, BinaryOp, HostValue, Isolated, IsolationError, ObjectId, Region, Value};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// `Runtime::global()` is one process-wide scheduler shared by every test
/// binary in this file; anything that calls `wait()` needs every other
/// `wait()`-driving test serialized behind it, since the terminator's
/// "drained" signal is shared across all of them. Tests that only touch a
/// `Region` directly (no `when(...)`/`wait()`) don't need this.
static RUNTIME_GUARD: Mutex<()> = Mutex::new(());

/// A mutable counter: the simplest possible host type with interior
/// mutability, standing in for whatever object model embeds this runtime.
struct Counter {
    id: ObjectId,
    value: AtomicI64,
}

impl Counter {
    fn new(initial: i64) -> Arc<Self> {
        Arc::new(Counter {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            value: AtomicI64::new(initial),
        })
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

// SAFETY: `id` is assigned once from a process-wide counter and never reused.
unsafe impl HostValue for Counter {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn type_name(&self) -> &str {
        "Counter"
    }

    fn binary_op(&self, op: BinaryOp, rhs: &Value) -> Option<Value> {
        let Value::Host(rhs) = rhs else { return None };
        let rhs = rhs.hash_value()? as i64;
        let lhs = self.get();
        let result = match op {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        };
        Some(Value::Host(Counter::new(result)))
    }

    fn binary_op_assign(&self, op: BinaryOp, rhs: &Value) -> Option<Value> {
        let Value::Host(rhs) = rhs else { return None };
        let rhs = rhs.hash_value()? as i64;
        let updated = match op {
            BinaryOp::Add => self.value.fetch_add(rhs, Ordering::SeqCst) + rhs,
            BinaryOp::Sub => self.value.fetch_sub(rhs, Ordering::SeqCst) - rhs,
            BinaryOp::Mul => {
                let new = self.get() * rhs;
                self.value.store(new, Ordering::SeqCst);
                new
            }
            BinaryOp::Div => {
                let new = self.get() / rhs;
                self.value.store(new, Ordering::SeqCst);
                new
            }
        };
        let _ = updated;
        None
    }

    fn hash_value(&self) -> Option<u64> {
        Some(self.get() as u64)
    }

    fn eq_value(&self, other: &dyn HostValue) -> Option<bool> {
        Some(self.get() == other.hash_value()? as i64)
    }

    fn cmp_value(&self, other: &dyn HostValue) -> Option<std::cmp::Ordering> {
        Some(self.get().cmp(&(other.hash_value()? as i64)))
    }
}

/// An immutable scalar: never captured, never gated.
struct Flag(bool);

unsafe impl HostValue for Flag {
    fn object_id(&self) -> ObjectId {
        0
    }

    fn type_name(&self) -> &str {
        "Flag"
    }

    fn is_immutable(&self) -> bool {
        true
    }
}

/// A container host type exercising the attribute/item/sequence operation
/// families `Counter` doesn't: a grab-bag of named attributes plus an
/// indexable list of values.
struct Bag {
    id: ObjectId,
    attrs: Mutex<std::collections::HashMap<String, Value>>,
    items: Mutex<Vec<Value>>,
}

impl Bag {
    fn new() -> Arc<Self> {
        Arc::new(Bag {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            attrs: Mutex::new(std::collections::HashMap::new()),
            items: Mutex::new(Vec::new()),
        })
    }
}

// SAFETY: `id` is assigned once from a process-wide counter and never reused.
unsafe impl HostValue for Bag {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn type_name(&self) -> &str {
        "Bag"
    }

    fn repr(&self) -> String {
        format!("Bag(len={})", self.items.lock().unwrap().len())
    }

    fn iter_sequence(&self) -> Option<Vec<Value>> {
        Some(self.items.lock().unwrap().clone())
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.attrs.lock().unwrap().get(name).cloned()
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<(), IsolationError> {
        self.attrs.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    fn get_item(&self, index: &Value) -> Option<Value> {
        let Value::Host(idx) = index else { return None };
        let i = idx.hash_value()? as usize;
        self.items.lock().unwrap().get(i).cloned()
    }

    fn set_item(&self, index: &Value, value: Value) -> Result<(), IsolationError> {
        let unsupported = || IsolationError::UnsupportedOp {
            type_name: "Bag".to_string(),
            op: "set_item".to_string(),
        };
        let Value::Host(idx) = index else {
            return Err(unsupported());
        };
        let i = idx.hash_value().ok_or_else(unsupported)? as usize;
        let mut items = self.items.lock().unwrap();
        if i == items.len() {
            items.push(value);
        } else if i < items.len() {
            items[i] = value;
        } else {
            return Err(unsupported());
        }
        Ok(())
    }
}

fn counter_value(region: &Region, name: &str) -> i64 {
    let Value::Host(h) = region.get(name).unwrap() else {
        panic!("expected a host value");
    };
    h.hash_value().unwrap() as i64
}

#[test]
fn immutable_values_are_never_gated() {
    let r = Region::new(Some("imm"));
    r.open();
    let flag = Value::Host(Arc::new(Flag(true)));
    r.set("flag", flag.clone()).unwrap();
    assert!(flag.isolate().is_none());
    r.close();
}

#[test]
fn set_before_open_is_rejected() {
    let r = Region::new(Some("closed"));
    let err = r.set("x", Value::Host(Counter::new(1))).unwrap_err();
    assert!(matches!(err, IsolationError::NotOpen { .. }));
}

#[test]
fn capturing_into_a_second_region_is_rejected() {
    let a = Region::new(Some("a"));
    let b = Region::new(Some("b"));
    a.open();
    b.open();

    let value = Value::Host(Counter::new(1));
    a.set("x", value.clone()).unwrap();

    let err = b.set("x", value).unwrap_err();
    assert!(matches!(err, IsolationError::AlreadyCaptured { .. }));

    a.close();
    b.close();
}

#[test]
fn gated_access_requires_the_owning_region_to_be_open() {
    let r = Region::new(Some("gate"));
    r.open();
    let value = Value::Host(Counter::new(10));
    r.set("counter", value.clone()).unwrap();
    let isolated: Isolated = value.isolate().expect("captured value must be isolatable");
    assert_eq!(isolated.hash_value().unwrap(), 10);
    r.close();

    let err = isolated.hash_value().unwrap_err();
    assert!(matches!(err, IsolationError::NotOpen { .. }));
}

#[test]
fn merge_moves_objects_and_aliases_the_source_region() {
    let a = Region::new(Some("a"));
    let b = Region::new(Some("b"));
    a.open();
    b.open();
    b.set("y", Value::Host(Counter::new(5))).unwrap();
    b.close();

    let merged = a.merge(&b).unwrap();
    assert_eq!(merged.region.id(), a.id());
    assert_eq!(b.id(), a.id(), "b must now resolve to a's id");

    assert_eq!(counter_value(&a, "y"), 5);
    a.close();
}

#[test]
fn when_on_a_non_shared_region_is_rejected() {
    let r = Region::new(Some("private"));
    let err = when(&[r]).unwrap_err();
    assert!(matches!(err, IsolationError::NotShared { .. }));
}

#[test]
fn nested_when_on_the_same_region_is_reentrant() {
    let r = Region::new(Some("nested"));
    r.make_shareable();
    r.open();
    let err = when(&[r.clone()]).unwrap_err();
    assert!(matches!(err, IsolationError::Reentrant { .. }));
    r.close();
}

#[test]
fn behaviors_over_the_same_region_run_in_enqueue_order() {
    let _guard = RUNTIME_GUARD.lock().unwrap();
    let r = Region::new(Some("ordered"));
    r.make_shareable();
    r.open();
    r.set("total", Value::Host(Counter::new(0))).unwrap();
    r.close();

    for step in 1..=3i64 {
        when(&[r.clone()])
            .unwrap()
            .run(move |regions| {
                let region = &regions[0];
                let Value::Host(counter) = region.get("total").unwrap() else {
                    unreachable!()
                };
                let updated = Counter::new(counter.hash_value().unwrap() as i64 + step);
                region.set("total", Value::Host(updated)).unwrap();
                Ok(())
            });
    }

    boc_regions::Runtime::global().wait().unwrap();

    r.open();
    assert_eq!(counter_value(&r, "total"), 1 + 2 + 3);
    r.close();
}

#[test]
fn two_disjoint_regions_can_each_run_their_own_behavior() {
    let _guard = RUNTIME_GUARD.lock().unwrap();
    let a = Region::new(Some("disjoint_a"));
    let b = Region::new(Some("disjoint_b"));
    a.make_shareable();
    b.make_shareable();
    a.open();
    a.set("v", Value::Host(Counter::new(1))).unwrap();
    a.close();
    b.open();
    b.set("v", Value::Host(Counter::new(2))).unwrap();
    b.close();

    when(&[a.clone()]).unwrap().run(|regions| {
        let region = &regions[0];
        region.set("v", Value::Host(Counter::new(100))).unwrap();
        Ok(())
    });
    when(&[b.clone()]).unwrap().run(|regions| {
        let region = &regions[0];
        region.set("v", Value::Host(Counter::new(200))).unwrap();
        Ok(())
    });

    boc_regions::Runtime::global().wait().unwrap();

    a.open();
    assert_eq!(counter_value(&a, "v"), 100);
    a.close();
    b.open();
    assert_eq!(counter_value(&b, "v"), 200);
    b.close();
}

#[test]
fn a_thunk_error_surfaces_from_wait_as_a_when_error() {
    let _guard = RUNTIME_GUARD.lock().unwrap();
    let r = Region::new(Some("failing"));
    r.make_shareable();

    when(&[r.clone()]).unwrap().run(|_regions| {
        Err("deliberate failure".into())
    });

    let err = boc_regions::Runtime::global().wait();
    assert!(err.is_err());
}

#[test]
fn disjoint_regions_run_their_behaviors_concurrently_not_sequentially() {
    let _guard = RUNTIME_GUARD.lock().unwrap();
    let a = Region::new(Some("parallel_a"));
    let b = Region::new(Some("parallel_b"));
    a.make_shareable();
    b.make_shareable();

    // Each behavior signals it has started, then blocks until it learns the
    // other one has also started. If the scheduler serialized these two
    // behaviors (ran one to completion before starting the other), the
    // second signal would never arrive and both recv() calls would hang —
    // this test would time out rather than merely fail.
    let (a_started_tx, a_started_rx) = crossbeam_channel::bounded(1);
    let (b_started_tx, b_started_rx) = crossbeam_channel::bounded(1);

    when(&[a.clone()]).unwrap().run(move |_regions| {
        a_started_tx.send(()).unwrap();
        b_started_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("behavior over `b` never started; regions were serialized");
        Ok(())
    });
    when(&[b.clone()]).unwrap().run(move |_regions| {
        b_started_tx.send(()).unwrap();
        a_started_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("behavior over `a` never started; regions were serialized");
        Ok(())
    });

    boc_regions::Runtime::global().wait().unwrap();
}

#[test]
fn acquiring_two_regions_serializes_against_each_ones_own_single_region_users() {
    let _guard = RUNTIME_GUARD.lock().unwrap();
    let shared_a = Region::new(Some("multi_a"));
    let shared_b = Region::new(Some("multi_b"));
    shared_a.make_shareable();
    shared_b.make_shareable();
    shared_a.open();
    shared_a.set("n", Value::Host(Counter::new(0))).unwrap();
    shared_a.close();
    shared_b.open();
    shared_b.set("n", Value::Host(Counter::new(0))).unwrap();
    shared_b.close();

    for _ in 0..5 {
        when(&[shared_a.clone(), shared_b.clone()])
            .unwrap()
            .run(|regions| {
                for region in &regions {
                    let Value::Host(c) = region.get("n").unwrap() else {
                        unreachable!()
                    };
                    let updated = Counter::new(c.hash_value().unwrap() as i64 + 1);
                    region.set("n", Value::Host(updated)).unwrap();
                }
                Ok(())
            });
    }

    boc_regions::Runtime::global().wait().unwrap();

    shared_a.open();
    assert_eq!(counter_value(&shared_a, "n"), 5);
    shared_a.close();
    shared_b.open();
    assert_eq!(counter_value(&shared_b, "n"), 5);
    shared_b.close();
}

#[test]
fn a_panicking_thunk_is_caught_and_still_releases_the_region() {
    let _guard = RUNTIME_GUARD.lock().unwrap();
    let r = Region::new(Some("panicking"));
    r.make_shareable();
    r.open();
    r.set("n", Value::Host(Counter::new(1))).unwrap();
    r.close();

    when(&[r.clone()]).unwrap().run(|_regions| {
        panic!("deliberate thunk panic");
    });

    // A behavior scheduled after the panicking one must still run: if the
    // panic had skipped close/release, this would hang forever.
    when(&[r.clone()]).unwrap().run(|regions| {
        let region = &regions[0];
        region.set("n", Value::Host(Counter::new(2))).unwrap();
        Ok(())
    });

    let err = boc_regions::Runtime::global().wait().unwrap_err();
    assert!(err.to_string().contains("deliberate thunk panic"));

    r.open();
    assert_eq!(counter_value(&r, "n"), 2);
    r.close();
}

#[test]
fn a_standalone_runtime_schedules_and_drains_its_own_behaviors() {
    let rt = boc_regions::Runtime::new(boc_regions::RuntimeConfig {
        worker_count: Some(1),
        queue_capacity_hint: None,
    });
    let r = Region::new(Some("standalone"));
    r.make_shareable();
    r.open();
    r.set("n", Value::Host(Counter::new(0))).unwrap();
    r.close();

    rt.when(&[r.clone()]).unwrap().run(|regions| {
        let region = &regions[0];
        region.set("n", Value::Host(Counter::new(41))).unwrap();
        Ok(())
    });

    rt.wait().unwrap();

    r.open();
    assert_eq!(counter_value(&r, "n"), 41);
    r.close();

    // The global singleton is a distinct runtime: nothing scheduled above
    // touched it, so it still drains trivially.
    boc_regions::Runtime::global().wait().unwrap();
}

#[test]
fn isolated_compare_orders_values() {
    let r = Region::new(Some("cmp"));
    r.open();
    let small = Value::Host(Counter::new(1));
    let big = Value::Host(Counter::new(2));
    r.set("small", small.clone()).unwrap();
    r.set("big", big.clone()).unwrap();
    let ismall = small.isolate().unwrap();
    let ibig = big.isolate().unwrap();
    assert_eq!(ismall.compare(&ibig).unwrap(), std::cmp::Ordering::Less);
    assert_eq!(ibig.compare(&ismall).unwrap(), std::cmp::Ordering::Greater);
    r.close();
}

#[test]
fn isolated_compare_is_unsupported_when_the_host_type_lacks_an_ordering() {
    let r = Region::new(Some("nocmp"));
    r.open();
    let bag_a = Value::Host(Bag::new());
    let bag_b = Value::Host(Bag::new());
    r.set("a", bag_a.clone()).unwrap();
    r.set("b", bag_b.clone()).unwrap();
    let ia = bag_a.isolate().unwrap();
    let ib = bag_b.isolate().unwrap();
    let err = ia.compare(&ib).unwrap_err();
    assert!(matches!(err, IsolationError::UnsupportedOp { .. }));
    r.close();
}

#[test]
fn isolated_eq_value_compares_structurally_not_by_identity() {
    let r = Region::new(Some("eqr"));
    r.open();
    let a = Value::Host(Counter::new(5));
    let b = Value::Host(Counter::new(5));
    let c = Value::Host(Counter::new(9));
    r.set("a", a.clone()).unwrap();
    r.set("b", b.clone()).unwrap();
    r.set("c", c.clone()).unwrap();
    let ia = a.isolate().unwrap();
    let ib = b.isolate().unwrap();
    let ic = c.isolate().unwrap();
    assert!(ia.eq_value(&ib).unwrap());
    assert!(!ia.eq_value(&ic).unwrap());
    r.close();
}

#[test]
fn isolated_binary_op_computes_without_mutating_either_operand() {
    let r = Region::new(Some("arith"));
    r.open();
    let lhs = Value::Host(Counter::new(10));
    r.set("lhs", lhs.clone()).unwrap();
    let isolated = lhs.isolate().unwrap();

    let rhs = Value::Host(Counter::new(3));
    let Value::Host(result) = isolated.binary_op(BinaryOp::Add, &rhs).unwrap() else {
        panic!("expected a host value");
    };
    assert_eq!(result.hash_value().unwrap(), 13);
    assert_eq!(counter_value(&r, "lhs"), 10);
    r.close();
}

#[test]
fn isolated_wrapper_gates_attribute_item_and_sequence_access() {
    let r = Region::new(Some("bag_region"));
    r.open();
    let bag_value = Value::Host(Bag::new());
    r.set("bag", bag_value.clone()).unwrap();
    let isolated = bag_value.isolate().unwrap();

    isolated
        .set_attr("label", Value::Host(Counter::new(7)))
        .unwrap();
    let Value::Host(attr) = isolated.get_attr("label").unwrap().unwrap() else {
        panic!("expected a host value");
    };
    assert_eq!(attr.hash_value().unwrap(), 7);

    isolated
        .set_item(Value::Host(Counter::new(0)), Value::Host(Counter::new(42)))
        .unwrap();
    let Value::Host(item) = isolated
        .get_item(&Value::Host(Counter::new(0)))
        .unwrap()
        .unwrap()
    else {
        panic!("expected a host value");
    };
    assert_eq!(item.hash_value().unwrap(), 42);

    assert_eq!(isolated.repr().unwrap(), "Bag(len=1)");
    assert_eq!(isolated.iter().unwrap().len(), 1);

    r.close();
    let err = isolated.repr().unwrap_err();
    assert!(matches!(err, IsolationError::NotOpen { .. }));
}

#[test]
fn capturing_a_free_region_adopts_it_as_a_child() {
    let parent = Region::new(Some("parent"));
    let child = Region::new(Some("child"));
    parent.open();
    assert!(child.is_free());
    parent.set("child", Value::Region(child.clone())).unwrap();
    assert!(!child.is_free());
    parent.close();
}

#[test]
fn recapturing_a_region_already_owned_by_the_same_owner_is_a_noop() {
    let parent = Region::new(Some("parent2"));
    let child = Region::new(Some("child2"));
    parent.open();
    parent.set("child", Value::Region(child.clone())).unwrap();
    // A second reference to the same already-owned child under the same
    // owner must not be rejected.
    parent
        .set("child_again", Value::Region(child.clone()))
        .unwrap();
    parent.close();
}

#[test]
fn capturing_a_region_owned_by_a_different_region_is_rejected() {
    let owner = Region::new(Some("owner"));
    let other = Region::new(Some("other_owner"));
    let child = Region::new(Some("child3"));
    owner.open();
    owner.set("child", Value::Region(child.clone())).unwrap();
    owner.close();

    other.open();
    let err = other
        .set("child", Value::Region(child.clone()))
        .unwrap_err();
    assert!(matches!(err, IsolationError::ForeignRegionGraph { .. }));
    other.close();
}

#[test]
fn detach_all_moves_objects_into_a_fresh_detached_region() {
    let r = Region::new(Some("detach_src"));
    r.make_shareable();
    r.open();
    r.set("x", Value::Host(Counter::new(1))).unwrap();
    r.set("y", Value::Host(Counter::new(2))).unwrap();

    let detached = r.detach_all().unwrap();
    assert!(matches!(r.get("x"), Err(IsolationError::NoSuchRoot { .. })));
    r.close();

    detached.open();
    assert_eq!(counter_value(&detached, "x"), 1);
    assert_eq!(counter_value(&detached, "y"), 2);
    detached.close();
}

#[test]
fn detach_all_requires_the_region_to_be_open_and_shared() {
    let r = Region::new(Some("detach_unshared"));
    r.open();
    let err = r.detach_all().unwrap_err();
    assert!(matches!(err, IsolationError::DetachNotAllowed { .. }));
}

#[test]
fn merging_an_already_owned_region_into_a_free_region_is_a_foreign_region_graph_error() {
    let holder = Region::new(Some("holder_c"));
    let owned = Region::new(Some("already_owned_c"));
    holder.open();
    holder
        .set("owned", Value::Region(owned.clone()))
        .unwrap();
    holder.close();

    let free = Region::new(Some("free_merge_target"));
    free.open();
    let err = free.merge(&owned).unwrap_err();
    assert!(matches!(err, IsolationError::ForeignRegionGraph { .. }));
    free.close();
}

#[test]
fn merging_explicit_explicit_regions_already_owned_by_disjoint_graphs_is_rejected() {
    let holder_a = Region::new(Some("holder_a"));
    let holder_b = Region::new(Some("holder_b"));
    let a = Region::new(Some("already_owned_a"));
    let b = Region::new(Some("already_owned_b"));

    holder_a.open();
    holder_a.set("a", Value::Region(a.clone())).unwrap();
    holder_a.close();

    holder_b.open();
    holder_b.set("b", Value::Region(b.clone())).unwrap();
    holder_b.close();

    // Both `a` and `b` are now non-free, owned by disjoint graphs rooted at
    // `holder_a` and `holder_b` respectively. `merge` checks `self`'s own
    // freedom first, so `a` (the target of the merge) fails its own
    // precondition before `b`'s foreign ownership is even considered.
    a.open();
    let err = a.merge(&b).unwrap_err();
    assert!(matches!(err, IsolationError::NotFree { .. }));
    a.close();
}
