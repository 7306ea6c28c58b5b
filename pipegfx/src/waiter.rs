//! Helpers for waiting until the hardware reaches some state.
//!
//! Every wait in this crate is a busy-poll against a deadline measured by a
//! [`Clock`](crate::platform::Clock), with a short voluntary delay between
//! polls. There are no interrupts or blocking primitives involved, so tests
//! can drive the waits deterministically with a simulated clock.

use crate::config::TimeoutPolicy;
use crate::error::{Error, HardwareTimeout};
use crate::platform::Clock;
use crate::Pipe;

/// The delay between successive polls.
pub const POLL_INTERVAL_US: u32 = 100;

/// Names the conditions the engine waits for, for error reports and logs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitFor {
    PipeEnabled,
    PipeDisabled,
    VBlank,
    RenderIdle,
    CrcReady,
}

impl WaitFor {
    /// How long to wait for this condition before giving up.
    pub const fn timeout_us(self) -> u32 {
        match self {
            WaitFor::PipeEnabled | WaitFor::PipeDisabled | WaitFor::VBlank => 50_000,
            WaitFor::RenderIdle => 500_000,
            WaitFor::CrcReady => 70_000,
        }
    }
}

/// Error type returned by [`poll`], which distinguishes between errors while
/// checking the condition and the condition simply never occurring.
#[derive(Debug)]
pub enum WaitError<E: Sized> {
    Platform(E),
    Timeout,
}

/// Calls `ready` until it returns `true` or until `timeout_us` has passed
/// on `clock`.
///
/// The condition is always checked at least once, and once more after the
/// deadline passes, so a condition that becomes true during the last delay
/// isn't reported as a timeout.
pub fn poll<C, E, F>(clock: &mut C, timeout_us: u32, mut ready: F) -> Result<(), WaitError<E>>
where
    C: Clock,
    F: FnMut() -> Result<bool, E>,
{
    let deadline = clock.now_us() + timeout_us as u64;
    loop {
        let expired = clock.now_us() >= deadline;
        if ready().map_err(WaitError::Platform)? {
            return Ok(());
        }
        if expired {
            return Err(WaitError::Timeout);
        }
        clock.delay_us(POLL_INTERVAL_US);
    }
}

/// Applies the timeout policy to the result of a [`poll`].
///
/// Returns `Ok(true)` if the condition occurred and `Ok(false)` if it timed
/// out but the policy says to continue regardless.
pub(crate) fn settle<E>(
    policy: TimeoutPolicy,
    pipe: Pipe,
    what: WaitFor,
    result: Result<(), WaitError<E>>,
) -> Result<bool, Error<E>> {
    match result {
        Ok(()) => Ok(true),
        Err(WaitError::Platform(err)) => Err(Error::Platform(err)),
        Err(WaitError::Timeout) => {
            let timeout_us = what.timeout_us();
            match policy {
                TimeoutPolicy::Strict => Err(Error::Timeout(HardwareTimeout {
                    pipe,
                    what,
                    timeout_us,
                })),
                TimeoutPolicy::LogAndContinue => {
                    log::warn!(
                        "pipe {:?}: no {:?} after {} us, continuing",
                        pipe,
                        what,
                        timeout_us
                    );
                    Ok(false)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::fake::FakeDevice;
    use crate::models::plb::PLB;

    #[test]
    fn test_poll_ready_immediately() {
        let dev = FakeDevice::new(PLB);
        let mut clock = dev.clock();
        let r: Result<(), WaitError<()>> = poll(&mut clock, 1_000, || Ok(true));
        assert!(r.is_ok());
        assert_eq!(dev.now_us(), 0);
    }

    #[test]
    fn test_poll_times_out_at_deadline() {
        let dev = FakeDevice::new(PLB);
        let mut clock = dev.clock();
        let mut polls = 0;
        let r: Result<(), WaitError<()>> = poll(&mut clock, 1_000, || {
            polls += 1;
            Ok(false)
        });
        assert!(matches!(r, Err(WaitError::Timeout)));
        assert_eq!(dev.now_us(), 1_000);
        assert_eq!(polls, 11);
    }

    #[test]
    fn test_poll_passes_errors_through() {
        let dev = FakeDevice::new(PLB);
        let mut clock = dev.clock();
        let r = poll(&mut clock, 1_000, || Err::<bool, _>("broken"));
        assert!(matches!(r, Err(WaitError::Platform("broken"))));
    }

    #[test]
    fn test_settle_policies() {
        let strict = settle::<()>(
            TimeoutPolicy::Strict,
            Pipe::A,
            WaitFor::VBlank,
            Err(WaitError::Timeout),
        );
        match strict {
            Err(Error::Timeout(t)) => {
                assert_eq!(t.what, WaitFor::VBlank);
                assert_eq!(t.timeout_us, 50_000);
            }
            other => panic!("unexpected {:?}", other),
        }

        let legacy = settle::<()>(
            TimeoutPolicy::LogAndContinue,
            Pipe::A,
            WaitFor::VBlank,
            Err(WaitError::Timeout),
        );
        assert!(matches!(legacy, Ok(false)));
    }
}
