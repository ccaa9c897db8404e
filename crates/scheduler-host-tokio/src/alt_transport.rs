//! The alternative host-integrated transport (spec.md §6): a drop-in,
//! out-of-CORE alternative to [`crate::TokioHostAdapter`] where each
//! submission is its own spawned tokio task rather than a slot in a shared
//! priority queue.
//!
//! This module is deliberately **not** part of the single-threaded CORE —
//! it uses `Arc<AtomicBool>` for cancellation because each task here really
//! does race against an independent tokio worker, which is exactly the
//! "multi-worker parallelism" the CORE's own `scheduler` module rules out.
//! Keep the two transports on opposite sides of that line; don't blend
//! `alt_transport`'s primitives back into `scheduler_core`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scheduler_core::Priority;

/// What an alt-transport callback returns.
pub enum AltCallbackResult {
    Done,
    Continuation(AltCallback),
}

pub type AltCallback = Box<dyn FnOnce(bool) -> AltCallbackResult + Send + 'static>;

/// Handle to a submission. Cancellation is cooperative: the flag is
/// checked before each activation, not torn out of a queue.
#[derive(Clone)]
pub struct AltTaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl AltTaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The three host task classes this transport's priorities collapse to, as
/// spec.md §6 describes ("translating priority levels to {user-blocking,
/// user-visible, background}"). Tokio has no native multi-priority
/// scheduler, so this is bookkeeping surfaced only through tracing, not a
/// real scheduling knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostTaskClass {
    UserBlocking,
    UserVisible,
    Background,
}

impl From<Priority> for HostTaskClass {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Immediate | Priority::UserBlocking => HostTaskClass::UserBlocking,
            Priority::Normal => HostTaskClass::UserVisible,
            Priority::Low | Priority::Idle => HostTaskClass::Background,
        }
    }
}

/// Fixed yield rule for this transport: a slice is always exactly 5ms wide,
/// measured from when the current activation of the task started, with no
/// pending queue or input-pending hint to refine it further.
const ALT_SLICE_MS: u64 = 5;

fn alt_should_yield(slice_start: Instant) -> bool {
    slice_start.elapsed() >= Duration::from_millis(ALT_SLICE_MS)
}

/// Schedule `callback` on the alternative transport. Returns a handle that
/// can cancel the (possibly not-yet-started, or mid-continuation) task.
///
/// `raw_priority` arrives untyped, exactly the boundary spec.md §6's
/// "unknown priorities fall back to Normal" rule describes -- a foreign
/// binding or a host-provided prioritized task API hands this transport a
/// bare integer, which [`Priority::from_raw`] normalizes before it is
/// translated to one of the three host task classes. The priority is not
/// otherwise consulted once the task is running -- this transport has no
/// deadline table, per spec.md §6.
pub fn schedule_alt(raw_priority: i32, delay: Option<Duration>, callback: AltCallback) -> AltTaskHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let handle = AltTaskHandle {
        cancelled: cancelled.clone(),
    };

    let delay = delay.unwrap_or(Duration::ZERO);
    let class = HostTaskClass::from(Priority::from_raw(raw_priority));
    tracing::trace!(?class, delay_ms = delay.as_millis() as u64, "alt transport task submitted");
    tokio::spawn(run_alt_chain(callback, cancelled, delay));

    handle
}

async fn run_alt_chain(callback: AltCallback, cancelled: Arc<AtomicBool>, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if cancelled.load(Ordering::SeqCst) {
        return;
    }
    drive(callback, cancelled).await;
}

async fn drive(mut callback: AltCallback, cancelled: Arc<AtomicBool>) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let slice_start = Instant::now();
        let did_timeout = false;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(did_timeout)));

        match outcome {
            Ok(AltCallbackResult::Done) => return,
            Ok(AltCallbackResult::Continuation(cont)) => {
                callback = cont;
                if alt_should_yield(slice_start) {
                    tokio::task::yield_now().await;
                }
            }
            Err(payload) => {
                // Rethrow inside a freshly spawned task (spec.md §6) rather
                // than unwinding this driver -- a panic here must not take
                // down the task that's juggling the continuation chain.
                tokio::spawn(async move { std::panic::resume_unwind(payload) });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn runs_to_completion_and_reports_done() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        let handle = schedule_alt(
            2, // Priority::Normal
            None,
            Box::new(move |_| {
                o.lock().unwrap().push("ran");
                AltCallbackResult::Done
            }),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_cancelled());
        assert_eq!(*order.lock().unwrap(), vec!["ran"]);
    }

    #[tokio::test]
    async fn continuation_chain_runs_to_completion() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        schedule_alt(
            2, // Priority::Normal
            None,
            Box::new(move |_| {
                o1.lock().unwrap().push("first");
                let o2 = o1.clone();
                AltCallbackResult::Continuation(Box::new(move |_| {
                    o2.lock().unwrap().push("second");
                    AltCallbackResult::Done
                }))
            }),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn cancel_before_start_skips_the_callback() {
        let invoked = Arc::new(AtomicBool::new(false));
        let i = invoked.clone();
        let handle = schedule_alt(
            3, // Priority::Low
            Some(Duration::from_millis(50)),
            Box::new(move |_| {
                i.store(true, Ordering::SeqCst);
                AltCallbackResult::Done
            }),
        );
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn delay_is_honored() {
        let ran_at = Arc::new(Mutex::new(None));
        let r = ran_at.clone();
        let start = Instant::now();
        schedule_alt(
            2, // Priority::Normal
            Some(Duration::from_millis(40)),
            Box::new(move |_| {
                *r.lock().unwrap() = Some(start.elapsed());
                AltCallbackResult::Done
            }),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        let elapsed = ran_at.lock().unwrap().expect("callback should have run");
        assert!(elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn unrecognized_raw_priority_falls_back_to_normal() {
        assert_eq!(HostTaskClass::from(Priority::from_raw(999)), HostTaskClass::UserVisible);
        assert_eq!(HostTaskClass::from(Priority::from_raw(0)), HostTaskClass::UserBlocking);
    }

    #[tokio::test]
    async fn unrecognized_raw_priority_still_runs_the_task() {
        let invoked = Arc::new(AtomicBool::new(false));
        let i = invoked.clone();
        schedule_alt(
            999, // falls back to Priority::Normal per Priority::from_raw
            None,
            Box::new(move |_| {
                i.store(true, Ordering::SeqCst);
                AltCallbackResult::Done
            }),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(invoked.load(Ordering::SeqCst));
    }
}
