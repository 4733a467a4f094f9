//! A behavior-oriented concurrency runtime: region-based object ownership
//! scheduled onto a fixed worker pool via a lock-free multi-region
//! acquisition protocol.
//!
//! A [`Region`] owns a set of mutable objects. While closed, nothing may
//! read or write its contents; [`when`] schedules a closure (a "behavior")
//! to run once every region it names is available, opening each region for
//! the closure's duration and serializing access the way a lock would,
//! without ever blocking a thread on a mutex. Objects are tagged into their
//! owning region by [`Region::set`] and by assignment through an
//! [`isolation::Isolated`] handle; the host object system this runtime
//! operates over is the narrow [`host::HostValue`] trait.
//!
//! ```no_run
//! use boc_regions::{when, Region};
//!
//! let a = Region::new(Some("a"));
//! let b = Region::new(Some("b"));
//! a.make_shareable();
//! b.make_shareable();
//!
//! when(&[a.clone(), b.clone()])
//!     .unwrap()
//!     .run(|regions| {
//!         let _ = regions; // both regions are open for the duration of this closure
//!         Ok(())
//!     });
//!
//! boc_regions::Runtime::global().wait().unwrap();
//! ```

mod behavior;
mod capture;
mod error;
mod host;
mod isolation;
mod queue;
mod region;
mod region_id;
mod runtime;
mod tag;
mod when;
mod worker;

pub use error::{InternalError, IsolationError, RuntimeError, WhenError};
pub use host::{BinaryOp, HostValue, ObjectId, Value};
pub use isolation::Isolated;
pub use region::{MergeView, Region};
pub use region_id::RegionId;
pub use runtime::{Runtime, RuntimeConfig};
pub use when::{When, when};
