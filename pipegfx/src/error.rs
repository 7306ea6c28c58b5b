//! Various error types returned by different components in this crate.

use crate::clocks::ConvergenceFailure;
use crate::sequencer::SequencerState;
use crate::waiter::WaitFor;
use crate::Pipe;

/// A general error type for errors from the main [`Engine`](crate::Engine)
/// type.
///
/// `E` is the error type shared by the [`Interface`](crate::interface::Interface)
/// implementation and the other platform collaborators in use.
#[non_exhaustive]
pub enum Error<E> {
    /// No divisors produce the requested dot clock closely enough, and the
    /// configuration doesn't allow substituting the fallback clock. No
    /// registers were written.
    Convergence(ConvergenceFailure),

    /// A polled hardware condition never occurred. Only returned under
    /// [`TimeoutPolicy::Strict`](crate::config::TimeoutPolicy::Strict).
    Timeout(HardwareTimeout),

    /// The operation isn't valid for the pipe's current state, such as
    /// enabling a port on a pipe that isn't running.
    InvalidSequence { pipe: Pipe, state: SequencerState },

    /// Indicates that the requested operation isn't supported for the
    /// current model.
    ///
    /// The crate API is designed to handle certain model differences at
    /// compile time within the type system, but for reasons of pragmatism
    /// some differences are handled only dynamically.
    Unsupported,

    /// A legacy timing names a VGA mode number that isn't in
    /// [`VGA_MODES`](crate::vga::VGA_MODES).
    UnknownVgaMode(u16),

    /// Errors reported by the register interface or another platform
    /// collaborator.
    Platform(E),
}

/// Describes a hardware condition that didn't occur in time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HardwareTimeout {
    pub pipe: Pipe,
    pub what: WaitFor,
    pub timeout_us: u32,
}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Error::Platform(err)
    }
}

impl<E: core::fmt::Debug> core::fmt::Debug for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Convergence(v) => f.debug_tuple("Convergence").field(v).finish(),
            Error::Timeout(v) => f.debug_tuple("Timeout").field(v).finish(),
            Error::InvalidSequence { pipe, state } => f
                .debug_struct("InvalidSequence")
                .field("pipe", pipe)
                .field("state", state)
                .finish(),
            Error::Unsupported => f.debug_tuple("Unsupported").finish(),
            Error::UnknownVgaMode(v) => f.debug_tuple("UnknownVgaMode").field(v).finish(),
            Error::Platform(v) => f.debug_tuple("Platform").field(v).finish(),
        }
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Convergence(v) => write!(f, "clock synthesis failed: {}", v),
            Error::Timeout(v) => write!(
                f,
                "pipe {:?}: timed out after {} us waiting for {:?}",
                v.pipe, v.timeout_us, v.what
            ),
            Error::InvalidSequence { pipe, state } => {
                write!(f, "pipe {:?}: operation not valid in state {:?}", pipe, state)
            }
            Error::Unsupported => write!(f, "operation not supported by this model"),
            Error::UnknownVgaMode(v) => write!(f, "unknown VGA mode {:#x}", v),
            Error::Platform(v) => write!(f, "platform error: {:?}", v),
        }
    }
}
