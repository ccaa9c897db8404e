//! `tokio::task::LocalSet`-backed `HostAdapter`.
//!
//! Everything posted through [`HostAdapter`] closes over `Rc` state, so it
//! can never be `Send` — `tokio::task::spawn_local` is what lets the work
//! loop share a single OS thread with a real tokio reactor without the
//! scheduler becoming thread-safe. Callers must be inside a `LocalSet`
//! (directly, or via `LocalSet::run_until`) before submitting anything
//! through an adapter built here.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use scheduler_core::{Clock, HostAdapter, TimeMs};

pub mod alt_transport;

/// A [`HostAdapter`] driven by a single-threaded tokio `LocalSet`.
///
/// `request_host_timeout` is backed by `tokio::time::sleep` plus a
/// generation counter: cancelling bumps the generation, so a sleep that
/// was already in flight when cancelled just finds itself stale and
/// resolves without invoking its callback.
pub struct TokioHostAdapter {
    clock: Rc<dyn Clock>,
    timeout_generation: Rc<Cell<u64>>,
}

impl TokioHostAdapter {
    /// Build an adapter stamped from `clock` — pass the same `Rc<dyn Clock>`
    /// to `Scheduler::with_clock` so the `now` seen by posted work matches
    /// the scheduler's own idea of time.
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            timeout_generation: Rc::new(Cell::new(0)),
        }
    }
}

impl HostAdapter for TokioHostAdapter {
    fn request_host_callback(&self, work: Rc<dyn Fn(bool, TimeMs) -> bool>) {
        let clock = self.clock.clone();
        tokio::task::spawn_local(async move {
            // Yield once before the first activation so this never runs
            // inline with the call that posted it -- a real macrotask turn.
            tokio::task::yield_now().await;
            loop {
                let now = clock.now_ms();
                let work = work.clone();
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work(true, now)));
                match outcome {
                    Ok(true) => tokio::task::yield_now().await,
                    Ok(false) => break,
                    Err(_payload) => {
                        tracing::error!("scheduler work loop panicked; reposting a fresh continuation");
                        tokio::task::yield_now().await;
                    }
                }
            }
        });
    }

    fn request_host_timeout(&self, callback: Box<dyn FnOnce()>, delay_ms: TimeMs) {
        let generation = self.timeout_generation.clone();
        let armed_at = generation.get();
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if generation.get() == armed_at {
                callback();
            }
        });
    }

    fn cancel_host_timeout(&self) {
        self.timeout_generation.set(self.timeout_generation.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use scheduler_core::{CallbackResult, Priority, Scheduler, SystemClock};

    #[tokio::test(flavor = "current_thread")]
    async fn runs_ready_work_through_the_local_set() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
                let adapter = Rc::new(TokioHostAdapter::new(clock.clone()));
                let scheduler = Scheduler::with_clock(adapter, clock);

                let order = Rc::new(RefCell::new(Vec::new()));
                let o = order.clone();
                scheduler.schedule(Priority::Normal, move |_| {
                    o.borrow_mut().push("A");
                    CallbackResult::Done
                });

                // Give the LocalSet a few turns to drive the posted continuation.
                for _ in 0..8 {
                    tokio::task::yield_now().await;
                }
                assert_eq!(*order.borrow(), vec!["A"]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timeout_fires_after_the_delay_and_respects_cancellation() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
                let adapter = TokioHostAdapter::new(clock);
                let fired = Rc::new(Cell::new(false));

                let f = fired.clone();
                adapter.request_host_timeout(Box::new(move || f.set(true)), 50);
                adapter.cancel_host_timeout();

                tokio::time::advance(Duration::from_millis(100)).await;
                tokio::task::yield_now().await;
                assert!(!fired.get(), "cancelled timer must not fire");
            })
            .await;
    }
}
