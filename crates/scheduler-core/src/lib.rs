//! Cooperative, priority-based task scheduler core.
//!
//! This crate provides the CORE of a scheduler that interleaves
//! user-supplied work with a host event loop: callbacks are tagged with a
//! coarse [`Priority`], assigned an effective deadline, and dispatched in
//! deadline order on a single execution context, yielding back to the host
//! between callbacks so it can handle its own events.
//!
//! - **[`heap`]** — array-backed binary min-heap shared by both queues.
//! - **[`task`]** — Task Record, priority levels, and the `(sortIndex, id)`
//!   ordering relation.
//! - **[`time`]** — the monotonic millisecond [`Clock`] abstraction.
//! - **[`yield_policy`]** — the `shouldYield` predicate.
//! - **[`host`]** — the [`HostAdapter`] capability the work loop is driven
//!   through; see the `scheduler-host-tokio` crate for a real
//!   implementation built on `tokio::task::LocalSet`.
//! - **[`scheduler`]** — the Work Loop and Submission & Control API.
//! - **[`error`]** — the one error this crate's public API can return.
//!
//! All scheduler state is owned by a single `Rc<RefCell<_>>` — there is no
//! locking and no parallelism here. Multi-worker execution, preemption, and
//! fair-share scheduling across users are explicitly out of scope (see
//! `SPEC_FULL.md` in the workspace root).

mod error;
mod heap;
mod host;
mod scheduler;
mod task;
mod time;
mod yield_policy;

pub use error::{Result, SchedulerError};
pub use host::HostAdapter;
pub use scheduler::{ScheduleOptions, Scheduler, SchedulerSnapshot};
pub use task::{Callback, CallbackResult, Priority, TaskHandle};
pub use time::{Clock, ManualClock, SystemClock, TimeMs};
pub use yield_policy::{InputPending, InputPendingHint, NoInputHint};
