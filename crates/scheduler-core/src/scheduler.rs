//! The Work Loop and the Submission & Control API.
//!
//! All scheduler state lives behind a single `Rc<RefCell<Inner>>` — there
//! are no locks and no atomics here (spec.md §5): the scheduler owns one
//! execution context, and `RefCell`'s runtime borrow checks are what stand
//! in for the "reentrancy forbidden" rule a lock would otherwise enforce.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::error::{Result, SchedulerError};
use crate::heap::MinHeap;
use crate::host::HostAdapter;
use crate::task::{Callback, CallbackResult, HeapEntry, Priority, TaskHandle, TaskRc, TaskRecord, TaskState};
use crate::time::{Clock, SystemClock, TimeMs};
use crate::yield_policy::{InputPendingHint, NoInputHint, YieldPolicy};

/// Options accepted by [`Scheduler::schedule_with_options`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleOptions {
    /// Milliseconds to add to `now` to form the task's `startTime`. Values
    /// `<= 0` (including `None`) mean "start now," per spec.md §6.
    pub delay: Option<TimeMs>,
}

/// Point-in-time view of the scheduler, for logging/tests/CLI display.
/// Participates in no invariant — pure observability.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub ready_len: usize,
    pub pending_len: usize,
    pub current_priority_rank: u8,
    pub paused: bool,
}

struct Inner {
    ready: MinHeap<HeapEntry>,
    pending: MinHeap<HeapEntry>,
    next_id: u64,
    current_priority: Priority,
    performing_work: bool,
    host_callback_scheduled: bool,
    host_timeout_scheduled: bool,
    paused: bool,
    slice_start: TimeMs,
    paint_requested: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            ready: MinHeap::new(),
            pending: MinHeap::new(),
            next_id: 1,
            current_priority: Priority::Normal,
            performing_work: false,
            host_callback_scheduled: false,
            host_timeout_scheduled: false,
            paused: false,
            slice_start: 0,
            paint_requested: false,
        }
    }
}

/// Cooperative, priority-based task scheduler.
///
/// Cheap to clone: clones are `Rc`-backed handles to the same single
/// execution context, not independent schedulers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
    clock: Rc<dyn Clock>,
    host: Rc<dyn HostAdapter>,
    yield_policy: Rc<RefCell<YieldPolicy>>,
    input_hint: Rc<dyn InputPendingHint>,
}

impl Scheduler {
    /// Create a scheduler driven by `host`, using the system wall clock.
    #[must_use]
    pub fn new(host: Rc<dyn HostAdapter>) -> Self {
        Self::with_clock(host, Rc::new(SystemClock::new()))
    }

    /// Create a scheduler driven by `host`, using an explicit clock — the
    /// clock must be the same one `host` uses to stamp its callback
    /// invocations, so tests typically share one `ManualClock` between
    /// both.
    #[must_use]
    pub fn with_clock(host: Rc<dyn HostAdapter>, clock: Rc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::new())),
            clock,
            host,
            yield_policy: Rc::new(RefCell::new(YieldPolicy::new())),
            input_hint: Rc::new(NoInputHint),
        }
    }

    /// Like [`Scheduler::with_clock`] but with a custom input-pending hint
    /// (see spec.md §4.4).
    #[must_use]
    pub fn with_input_hint(
        host: Rc<dyn HostAdapter>,
        clock: Rc<dyn Clock>,
        input_hint: Rc<dyn InputPendingHint>,
    ) -> Self {
        let mut scheduler = Self::with_clock(host, clock);
        scheduler.input_hint = input_hint;
        scheduler
    }

    // -- Submission API -------------------------------------------------

    /// Schedule `callback` to run at `priority`, starting as soon as the
    /// ready queue can reach it.
    pub fn schedule(
        &self,
        priority: Priority,
        callback: impl FnOnce(bool) -> CallbackResult + 'static,
    ) -> TaskHandle {
        self.schedule_with_options(priority, ScheduleOptions::default(), callback)
    }

    /// Schedule `callback` to run at `priority`, honoring `options.delay`.
    pub fn schedule_with_options(
        &self,
        priority: Priority,
        options: ScheduleOptions,
        callback: impl FnOnce(bool) -> CallbackResult + 'static,
    ) -> TaskHandle {
        self.schedule_named(priority, options, format!("task-{}", priority_label(priority)), callback)
    }

    /// Schedule `callback` with an explicit `name` used only for logging.
    pub fn schedule_named(
        &self,
        priority: Priority,
        options: ScheduleOptions,
        name: impl Into<String>,
        callback: impl FnOnce(bool) -> CallbackResult + 'static,
    ) -> TaskHandle {
        let now = self.clock.now_ms();
        let start_time = match options.delay {
            Some(delay) if delay > 0 => now + delay,
            _ => now,
        };
        let expiration_time = start_time + priority.timeout_ms();

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };

        let is_delayed = start_time > now;
        let sort_index = if is_delayed { start_time } else { expiration_time };

        let record: TaskRc = Rc::new(TaskRecord {
            id,
            priority,
            name: name.into(),
            state: RefCell::new(TaskState {
                callback: Some(Box::new(callback) as Callback),
                is_queued: true,
                start_time,
                expiration_time,
                sort_index,
            }),
        });

        tracing::debug!(task_id = id, task = %record.name, ?priority, delayed = is_delayed, "task scheduled");

        if is_delayed {
            self.inner.borrow_mut().pending.push(HeapEntry(record.clone()));
            let is_new_head = {
                let inner = self.inner.borrow();
                inner.ready.is_empty()
                    && inner
                        .pending
                        .peek()
                        .is_some_and(|head| Rc::ptr_eq(&head.0, &record))
            };
            if is_new_head {
                self.arm_timer_for_pending_head();
            }
        } else {
            self.inner.borrow_mut().ready.push(HeapEntry(record.clone()));
            let should_request = {
                let inner = self.inner.borrow();
                !inner.host_callback_scheduled && !inner.performing_work
            };
            if should_request {
                self.request_host_callback();
            }
        }

        TaskHandle(record)
    }

    // -- Control API ------------------------------------------------------

    /// Peek the ready queue's head without removing it, or `None`.
    #[must_use]
    pub fn first_callback_node(&self) -> Option<TaskHandle> {
        self.inner
            .borrow()
            .ready
            .peek()
            .map(|entry| TaskHandle(entry.0.clone()))
    }

    /// The ambient priority level in effect right now.
    #[must_use]
    pub fn current_priority_level(&self) -> Priority {
        self.inner.borrow().current_priority
    }

    /// Current time per this scheduler's clock.
    #[must_use]
    pub fn now(&self) -> TimeMs {
        self.clock.now_ms()
    }

    /// Whether the work loop (or a long-running callback cooperating with
    /// it) should yield back to the host right now.
    #[must_use]
    pub fn should_yield(&self) -> bool {
        self.should_yield_to_host(self.clock.now_ms())
    }

    /// Mark that a paint is pending; forces a yield on the next check
    /// regardless of elapsed time, as long as an input-pending hint is
    /// available (spec.md §4.4).
    pub fn request_paint(&self) {
        self.inner.borrow_mut().paint_requested = true;
    }

    /// Change the slice length used by the yield policy. `fps == 0` resets
    /// to the 5ms default; values outside `[0, 125]` are rejected.
    pub fn force_frame_rate(&self, fps: i32) -> Result<()> {
        self.yield_policy.borrow_mut().force_frame_rate(fps)
    }

    /// Stop the work loop from consuming any further ready tasks until
    /// [`Scheduler::continue_execution`] is called.
    pub fn pause_execution(&self) {
        self.inner.borrow_mut().paused = true;
    }

    /// Clear the pause latch and, if work is waiting and nothing is
    /// already in flight, request a continuation.
    pub fn continue_execution(&self) {
        self.inner.borrow_mut().paused = false;
        let should_request = {
            let inner = self.inner.borrow();
            !inner.host_callback_scheduled && !inner.performing_work && !inner.ready.is_empty()
        };
        if should_request {
            self.request_host_callback();
        }
    }

    /// Temporarily replace the ambient priority while `f` executes;
    /// restored on every exit path, including panics (invariant 5).
    pub fn run_with_priority<R>(&self, level: Priority, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter_priority(level);
        f()
    }

    /// Like [`Scheduler::run_with_priority`], but forces Normal priority if
    /// the ambient priority is currently Normal or more urgent, and
    /// otherwise preserves the (less urgent) ambient priority — matching
    /// spec.md §9's "next" helper.
    pub fn next<R>(&self, f: impl FnOnce() -> R) -> R {
        let current = self.current_priority_level();
        let level = if current.rank() <= Priority::Normal.rank() {
            Priority::Normal
        } else {
            current
        };
        self.run_with_priority(level, f)
    }

    /// Capture the ambient priority now; every future invocation of the
    /// returned closure runs `f` under that captured priority.
    pub fn wrap_callback<F>(&self, mut f: F) -> impl FnMut() + 'static
    where
        F: FnMut() + 'static,
    {
        let captured = self.current_priority_level();
        let scheduler = self.clone();
        move || {
            scheduler.run_with_priority(captured, || f());
        }
    }

    /// Snapshot queue depths and scheduler flags for logging/inspection.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let inner = self.inner.borrow();
        SchedulerSnapshot {
            ready_len: inner.ready.len(),
            pending_len: inner.pending.len(),
            current_priority_rank: inner.current_priority.rank(),
            paused: inner.paused,
        }
    }

    fn enter_priority(&self, level: Priority) -> PriorityGuard {
        let previous = self.inner.borrow().current_priority;
        self.inner.borrow_mut().current_priority = level;
        PriorityGuard {
            scheduler: self.clone(),
            previous,
        }
    }

    // -- Work loop ----------------------------------------------------------

    /// Promote matured, uncancelled pending tasks into the ready queue.
    /// Cancelled pending tasks are dropped as they're found, regardless of
    /// maturity (spec.md §4.3 step 3).
    fn advance_timers(&self, now: TimeMs) {
        loop {
            let head = {
                let inner = self.inner.borrow();
                inner.pending.peek().map(|entry| entry.0.clone())
            };
            let Some(task) = head else {
                break;
            };

            let (cancelled, start_time) = {
                let state = task.state.borrow();
                (state.callback.is_none(), state.start_time)
            };

            if cancelled {
                self.inner.borrow_mut().pending.pop();
                continue;
            }
            if start_time > now {
                break;
            }

            self.inner.borrow_mut().pending.pop();
            {
                let mut state = task.state.borrow_mut();
                state.sort_index = state.expiration_time;
            }
            tracing::trace!(task_id = task.id, task = %task.name, "task promoted to ready");
            self.inner.borrow_mut().ready.push(HeapEntry(task));
        }
    }

    fn should_yield_to_host(&self, now: TimeMs) -> bool {
        let (slice_start, paint_requested) = {
            let inner = self.inner.borrow();
            (inner.slice_start, inner.paint_requested)
        };
        let elapsed = now - slice_start;
        self.yield_policy
            .borrow()
            .should_yield(elapsed, self.input_hint.as_ref(), paint_requested)
    }

    /// Entered with `(hasTimeRemaining, initialTime)` from the host
    /// adapter (spec.md §4.3). Returns whether the host should invoke this
    /// scheduler again.
    fn perform_work(&self, has_time_remaining: bool, initial_time: TimeMs) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            inner.host_callback_scheduled = false;
            inner.paint_requested = false;
            if inner.host_timeout_scheduled {
                inner.host_timeout_scheduled = false;
                drop(inner);
                self.host.cancel_host_timeout();
            }
        }

        let previous_priority = self.inner.borrow().current_priority;
        {
            let mut inner = self.inner.borrow_mut();
            inner.performing_work = true;
            inner.slice_start = initial_time;
        }

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.flush_work(has_time_remaining, initial_time)
        }));

        {
            let mut inner = self.inner.borrow_mut();
            inner.performing_work = false;
            inner.current_priority = previous_priority;
        }

        match outcome {
            Ok(more_work) => more_work,
            Err(payload) => {
                // The scheduler's own bookkeeping above is already
                // restored; the host adapter is responsible for still
                // re-arming a continuation so remaining tasks run (see
                // scheduler-host-tokio), so we just let the panic keep
                // unwinding from here.
                std::panic::resume_unwind(payload)
            }
        }
    }

    fn flush_work(&self, has_time_remaining: bool, initial_time: TimeMs) -> bool {
        let mut now = initial_time;
        self.advance_timers(now);

        loop {
            if self.inner.borrow().paused {
                break;
            }

            let head = {
                let inner = self.inner.borrow();
                inner.ready.peek().map(|entry| entry.0.clone())
            };
            let Some(task) = head else {
                break;
            };

            let expiration_time = task.state.borrow().expiration_time;
            if expiration_time > now && (!has_time_remaining || self.should_yield_to_host(now)) {
                break;
            }

            let callback = task.state.borrow_mut().callback.take();
            let Some(callback) = callback else {
                self.inner.borrow_mut().ready.pop();
                continue;
            };

            self.inner.borrow_mut().current_priority = task.priority;
            let did_timeout = task.state.borrow().expiration_time <= now;

            tracing::trace!(task_id = task.id, task = %task.name, did_timeout, "task running");

            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(did_timeout)));

            // Ambient priority is restored exactly once per activation, by
            // perform_work after flush_work returns (spec.md §4.3 step 6) —
            // not here per task.
            now = self.clock.now_ms();

            match outcome {
                Ok(CallbackResult::Continuation(cont)) => {
                    task.state.borrow_mut().callback = Some(cont);
                }
                Ok(CallbackResult::Done) => {
                    task.state.borrow_mut().is_queued = false;
                    self.pop_ready_if_still_head(&task);
                }
                Err(payload) => {
                    task.state.borrow_mut().is_queued = false;
                    tracing::error!(task_id = task.id, task = %task.name, "task errored");
                    self.pop_ready_if_still_head(&task);
                    std::panic::resume_unwind(payload);
                }
            }

            self.advance_timers(now);
        }

        let more_ready = !self.inner.borrow().ready.is_empty();
        if more_ready {
            return true;
        }

        let next_pending_start = {
            let inner = self.inner.borrow();
            inner.pending.peek().map(|entry| entry.0.state.borrow().start_time)
        };
        if let Some(start) = next_pending_start {
            self.request_host_timeout((start - now).max(0));
        }
        false
    }

    fn pop_ready_if_still_head(&self, task: &TaskRc) {
        let still_head = {
            let inner = self.inner.borrow();
            inner
                .ready
                .peek()
                .is_some_and(|entry| Rc::ptr_eq(&entry.0, task))
        };
        if still_head {
            self.inner.borrow_mut().ready.pop();
        }
    }

    // -- Host adapter plumbing ----------------------------------------------

    fn request_host_callback(&self) {
        self.inner.borrow_mut().host_callback_scheduled = true;
        let scheduler = self.clone();
        let work: Rc<dyn Fn(bool, TimeMs) -> bool> =
            Rc::new(move |has_time, now| scheduler.perform_work(has_time, now));
        self.host.request_host_callback(work);
    }

    fn request_host_timeout(&self, delay_ms: TimeMs) {
        self.inner.borrow_mut().host_timeout_scheduled = true;
        let scheduler = self.clone();
        self.host.request_host_timeout(
            Box::new(move || scheduler.handle_timeout()),
            delay_ms,
        );
    }

    fn handle_timeout(&self) {
        self.inner.borrow_mut().host_timeout_scheduled = false;
        let now = self.clock.now_ms();
        self.advance_timers(now);

        if self.inner.borrow().performing_work {
            return;
        }

        let (ready_empty, callback_scheduled) = {
            let inner = self.inner.borrow();
            (inner.ready.is_empty(), inner.host_callback_scheduled)
        };

        if !ready_empty {
            if !callback_scheduled {
                self.request_host_callback();
            }
            return;
        }

        let next_start = {
            let inner = self.inner.borrow();
            inner.pending.peek().map(|entry| entry.0.state.borrow().start_time)
        };
        if let Some(start) = next_start {
            self.request_host_timeout((start - now).max(0));
        }
    }

    fn arm_timer_for_pending_head(&self) {
        let now = self.clock.now_ms();
        let already_armed = self.inner.borrow().host_timeout_scheduled;
        if already_armed {
            self.host.cancel_host_timeout();
            self.inner.borrow_mut().host_timeout_scheduled = false;
        }
        let next_start = {
            let inner = self.inner.borrow();
            inner.pending.peek().map(|entry| entry.0.state.borrow().start_time)
        };
        if let Some(start) = next_start {
            self.request_host_timeout((start - now).max(0));
        }
    }
}

struct PriorityGuard {
    scheduler: Scheduler,
    previous: Priority,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        self.scheduler.inner.borrow_mut().current_priority = self.previous;
    }
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Immediate => "immediate",
        Priority::UserBlocking => "user-blocking",
        Priority::Normal => "normal",
        Priority::Low => "low",
        Priority::Idle => "idle",
    }
}
