//! The yield predicate deciding mid-loop whether to return to the host.

use crate::error::{Result, SchedulerError};
use crate::time::TimeMs;

const DEFAULT_FRAME_INTERVAL_MS: TimeMs = 5;
const CONTINUOUS_INPUT_INTERVAL_MS: TimeMs = 50;
const MAX_INTERVAL_MS: TimeMs = 300;

/// Snapshot of pending input at the moment `should_yield` is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct InputPending {
    /// A discrete input event (e.g. a click) is waiting to be handled.
    pub discrete: bool,
    /// A continuous input event (e.g. a pointer move) is waiting.
    pub continuous: bool,
}

/// Host capability for reporting whether input is waiting to be handled.
///
/// Returning `None` means the host has no such signal available at all,
/// which collapses the yield policy to a plain time-slice check.
pub trait InputPendingHint {
    /// Current input-pending state, or `None` if unavailable.
    fn pending(&self) -> Option<InputPending>;
}

/// Default hint used when the host has no real input source wired up.
pub struct NoInputHint;

impl InputPendingHint for NoInputHint {
    fn pending(&self) -> Option<InputPending> {
        None
    }
}

pub(crate) struct YieldPolicy {
    frame_interval: TimeMs,
}

impl YieldPolicy {
    pub(crate) fn new() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL_MS,
        }
    }

    pub(crate) fn frame_interval(&self) -> TimeMs {
        self.frame_interval
    }

    /// `fps == 0` resets to the default slice; `fps` outside `[0, 125]` is
    /// rejected with a log and no state change (spec.md §4.2/§4.4/§7).
    pub(crate) fn force_frame_rate(&mut self, fps: i32) -> Result<()> {
        if fps == 0 {
            self.frame_interval = DEFAULT_FRAME_INTERVAL_MS;
            return Ok(());
        }
        if !(0..=125).contains(&fps) {
            tracing::warn!(fps, "forceFrameRate: value out of range [0, 125]; ignoring");
            return Err(SchedulerError::InvalidFrameRate { fps });
        }
        self.frame_interval = 1000 / TimeMs::from(fps);
        Ok(())
    }

    pub(crate) fn should_yield(
        &self,
        elapsed: TimeMs,
        input: &dyn InputPendingHint,
        paint_requested: bool,
    ) -> bool {
        if elapsed < self.frame_interval {
            return false;
        }
        match input.pending() {
            None => true,
            Some(pending) => {
                if paint_requested {
                    return true;
                }
                if elapsed < CONTINUOUS_INPUT_INTERVAL_MS {
                    return pending.discrete;
                }
                if elapsed < MAX_INTERVAL_MS {
                    return pending.discrete || pending.continuous;
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hint(Option<InputPending>);
    impl InputPendingHint for Hint {
        fn pending(&self) -> Option<InputPending> {
            self.0
        }
    }

    #[test]
    fn under_budget_never_yields() {
        let policy = YieldPolicy::new();
        assert!(!policy.should_yield(4, &NoInputHint, false));
    }

    #[test]
    fn no_hint_yields_as_soon_as_budget_exhausted() {
        let policy = YieldPolicy::new();
        assert!(policy.should_yield(5, &NoInputHint, false));
    }

    #[test]
    fn paint_requested_forces_yield_even_with_hint() {
        let policy = YieldPolicy::new();
        let hint = Hint(Some(InputPending {
            discrete: false,
            continuous: false,
        }));
        assert!(policy.should_yield(10, &hint, true));
    }

    #[test]
    fn continuous_input_alone_does_not_force_yield_early() {
        let policy = YieldPolicy::new();
        let hint = Hint(Some(InputPending {
            discrete: false,
            continuous: true,
        }));
        assert!(!policy.should_yield(10, &hint, false));
        assert!(policy.should_yield(10, &Hint(Some(InputPending { discrete: true, continuous: false })), false));
    }

    #[test]
    fn any_pending_input_forces_yield_past_continuous_interval() {
        let policy = YieldPolicy::new();
        let hint = Hint(Some(InputPending {
            discrete: false,
            continuous: true,
        }));
        assert!(policy.should_yield(60, &hint, false));
    }

    #[test]
    fn past_max_interval_always_yields() {
        let policy = YieldPolicy::new();
        let hint = Hint(Some(InputPending {
            discrete: false,
            continuous: false,
        }));
        assert!(policy.should_yield(301, &hint, false));
    }

    #[test]
    fn force_frame_rate_updates_interval() {
        let mut policy = YieldPolicy::new();
        policy.force_frame_rate(30).unwrap();
        assert_eq!(policy.frame_interval(), 33);
        policy.force_frame_rate(0).unwrap();
        assert_eq!(policy.frame_interval(), DEFAULT_FRAME_INTERVAL_MS);
    }

    #[test]
    fn force_frame_rate_rejects_out_of_range() {
        let mut policy = YieldPolicy::new();
        let before = policy.frame_interval();
        let err = policy.force_frame_rate(200);
        assert!(err.is_err());
        assert_eq!(policy.frame_interval(), before);
    }
}
