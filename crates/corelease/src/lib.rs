//! Host-wide CPU core leases for independent sessions.
//!
//! Sessions reserve disjoint subsets of the host's core pool through a
//! [`LeaseManager`]. The Lease Store and Owner Registry live in one state file
//! in a shared directory, and every read-modify-write runs under an exclusive
//! `flock(2)` on a lock token next to it.
//!
//! ```no_run
//! use corelease::{LeaseManager, LeaseRequest, SessionId};
//! use std::path::Path;
//!
//! let manager = LeaseManager::open(Path::new("/tmp/corelease"), 8, None)?;
//! let lease = manager.acquire_lease(&SessionId::current_process(), &LeaseRequest::Count(2))?;
//! println!("pinned to {}", lease.cpu_list());
//! // cores are released when `lease` goes out of scope
//! # Ok::<(), corelease::LeaseError>(())
//! ```
pub mod allocator;
pub mod core_set;
pub mod error;
pub mod lock;
pub mod manager;
pub mod release;
pub mod session;
pub mod settings;
pub mod store;

// re-export
pub use allocator::LeaseRequest;
pub use core_set::{format_cpu_list, parse_cpu_list, CoreSet};
pub use error::{ErrorKind, LeaseError, Result};
pub use lock::{with_lock, LockGuard};
pub use manager::LeaseManager;
pub use release::{Lease, ReleaseHandler};
pub use session::SessionId;
pub use settings::{LeaseSettings, Settings};
pub use store::{LeaseState, LeaseStore, OwnerEntry};
