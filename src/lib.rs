//! Dependency-group task scheduling.
//!
//! A fixed pool of worker threads executes arbitrary closures while honoring
//! producer/consumer ordering constraints expressed as [`DependencyGroup`]s:
//! resettable fences that any number of tasks produce into and any number of
//! tasks or callers wait on. There is no explicit task graph and no one-shot
//! futures wiring stages together; a task simply names the groups it waits
//! for and the group it signals, and workers pick whichever queued task is
//! currently unblocked.
//!
//! Threads that need a result do not idle:
//! [`WorkerPool::process_until_complete`] drains pool tasks on the calling
//! thread until its groups are ready, which is also what keeps nested
//! scheduling from deadlocking a fully busy pool.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use taskpool::{DependencyGroup, WorkerPool};
//!
//! let pool = WorkerPool::new(4);
//! let mut uploads = DependencyGroup::new();
//!
//! let uploaded = Arc::new(AtomicU32::new(0));
//! for _ in 0..16 {
//!     let uploaded = uploaded.clone();
//!     pool.schedule(
//!         move || {
//!             uploaded.fetch_add(1, Ordering::Relaxed);
//!         },
//!         &[],
//!         Some(&mut uploads),
//!     );
//! }
//!
//! pool.wait_for_all(&[uploads]);
//! assert_eq!(uploaded.load(Ordering::Relaxed), 16);
//! ```

mod dependency_group;
mod future;
mod parallel;
mod pool;
mod task;

pub use dependency_group::DependencyGroup;
pub use future::TaskFuture;
pub use pool::{WorkerContext, WorkerPool};
