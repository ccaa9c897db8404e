//! Host Adapter capability.
//!
//! The scheduler depends only on this trait, never on a concrete host
//! primitive — production code wires in `scheduler-host-tokio`'s
//! `TokioHostAdapter`; tests wire in a recording stub that lets them pump
//! the "self-message" and "timer" by hand.

use std::rc::Rc;

use crate::time::TimeMs;

/// Abstraction over the two host primitives the work loop needs:
/// "schedule me a continuation as soon as the host is idle" and "call me
/// back after N milliseconds."
///
/// At most one outstanding self-message and one outstanding timer may
/// exist at a time (spec.md §5) — the scheduler enforces that invariant
/// via its own latches; the adapter only needs to honor cancellation.
pub trait HostAdapter {
    /// Store `work` as the pending continuation and arrange for it to run
    /// on a later turn of the host's event loop (a macrotask, never
    /// inline). `work` returns whether more work remains; a `true`-telling
    /// host must call it again on a later turn, and keep doing so until it
    /// returns `false`.
    fn request_host_callback(&self, work: Rc<dyn Fn(bool, TimeMs) -> bool>);

    /// Arrange for `callback` to run after `delay_ms` milliseconds unless
    /// cancelled first via [`HostAdapter::cancel_host_timeout`].
    fn request_host_timeout(&self, callback: Box<dyn FnOnce()>, delay_ms: TimeMs);

    /// Cancel the single outstanding timer, if any. A no-op if none is
    /// outstanding.
    fn cancel_host_timeout(&self);
}
