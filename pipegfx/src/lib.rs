#![no_std]

#[cfg(any(test, feature = "fake"))]
#[macro_use]
extern crate std;

pub mod clocks;
pub mod config;
pub mod crc;
pub mod error;
pub mod interface;
pub mod low_level;
pub mod models;
pub mod plane;
pub mod platform;
pub mod port;
pub mod registers;
pub mod sequencer;
pub mod timing;
pub mod tuning;
pub mod vga;
pub mod waiter;

pub use config::Config;
pub use error::Error;
pub use interface::{Aperture, Interface};
pub use platform::{Clock, PortDriver, Surfaces};
pub use sequencer::{ModeSet, ModeSetReport, PipeState, SequencerState};
pub use timing::TimingDescriptor;
pub use tuning::{TuneOutcome, TuningWorkaroundState};

use models::Model;
use sequencer::PipeContext;

/// Identifies one of the two display pipes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Pipe {
    A,
    B,
}

impl Pipe {
    pub const ALL: [Pipe; 2] = [Pipe::A, Pipe::B];

    pub const fn index(self) -> usize {
        match self {
            Pipe::A => 0,
            Pipe::B => 1,
        }
    }

    /// The pipe's bit in the pipe masks that port drivers receive.
    pub const fn mask(self) -> u32 {
        1 << self.index()
    }
}

/// The kinds of output port a pipe can drive.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PortType {
    Lvds,
    Sdvo,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PowerState {
    On,
    Off,
}

/// The main entry point for driving a display engine.
///
/// An `Engine` owns the register interface and the clock, and remembers
/// where each pipe is in its bring-up sequence. The platform services that
/// are only needed for particular operations, such as scratch surfaces and
/// port drivers, are borrowed per call instead.
///
/// The model type parameter selects the hardware family at compile time.
/// Differences between steppings of a family are selected at runtime by
/// [`Config::revision`].
pub struct Engine<M: Model, I: Interface, C: Clock> {
    pub(crate) ll: low_level::LowLevel<M, I>,
    pub(crate) clock: C,
    pub(crate) config: Config,
    pub(crate) pipes: [PipeContext; 2],
}

impl<M: Model, I: Interface, C: Clock> Engine<M, I, C> {
    /// Wraps the given interface and clock. This doesn't touch the hardware,
    /// and assumes that both pipes start out disabled.
    pub fn new(ei: I, clock: C, config: Config) -> Self {
        Self {
            ll: low_level::LowLevel::new(ei),
            clock,
            config,
            pipes: [PipeContext::new(), PipeContext::new()],
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Changes take effect at the next operation that consults them.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Direct access to the register interface, for diagnostics.
    pub fn borrow_interface(&mut self) -> &mut I {
        self.ll.borrow_interface()
    }

    pub fn sequencer_state(&self, pipe: Pipe) -> SequencerState {
        self.pipes[pipe.index()].state
    }

    pub fn tuning_state(&self, pipe: Pipe) -> &TuningWorkaroundState {
        &self.pipes[pipe.index()].tuning
    }

    /// Enables `pipe` with a new mode, or disables it.
    ///
    /// Enabling requires the pipe to be disabled, and leaves it with its
    /// plane scanning out but its port still off. Call
    /// [`program_port`](Self::program_port) and then
    /// [`post_program_port`](Self::post_program_port) to finish.
    ///
    /// On revisions that need it, enabling ends with htotal calibration,
    /// which records its result in the given timing so that later mode sets
    /// with the same timing skip straight to the calibrated value. The
    /// surfaces are only used for that calibration.
    ///
    /// Disabling requires the port to be off already. Disabling an idle pipe
    /// succeeds without touching the hardware.
    ///
    /// Any requested clock that can't be synthesized is reported before the
    /// hardware is touched.
    pub fn mode_set<S>(
        &mut self,
        pipe: Pipe,
        req: ModeSet,
        surfaces: &mut S,
    ) -> Result<ModeSetReport, Error<I::Error>>
    where
        S: Surfaces<Error = I::Error>,
    {
        match req {
            ModeSet::On {
                port,
                timing,
                framebuffer,
            } => sequencer::mode_set_on(self, pipe, port, timing, framebuffer, surfaces),
            ModeSet::Off => sequencer::mode_set_off(self, pipe),
        }
    }

    /// Turns the port that `pipe` is driving on or off.
    ///
    /// Turning it off also turns off the plane feeding it, leaving the pipe
    /// running with no plane.
    pub fn program_port<P>(
        &mut self,
        pipe: Pipe,
        port: PortType,
        power: PowerState,
        driver: &mut P,
    ) -> Result<(), Error<I::Error>>
    where
        P: PortDriver<Error = I::Error>,
    {
        sequencer::program_port(self, pipe, port, power, driver)
    }

    /// Applies the fixups that follow a port being turned on, including a
    /// reset of the pipe's palette to a linear ramp.
    pub fn post_program_port(
        &mut self,
        pipe: Pipe,
        port: PortType,
        status: PowerState,
    ) -> Result<(), Error<I::Error>> {
        sequencer::post_program_port(self, pipe, port, status)
    }

    pub fn set_pipe_power(&mut self, pipe: Pipe, power: PowerState) -> Result<(), Error<I::Error>> {
        sequencer::set_pipe_power(self, pipe, power)
    }

    /// Reads back what the hardware says about `pipe`.
    pub fn read_pipe_state(&mut self, pipe: Pipe) -> Result<PipeState, Error<I::Error>> {
        sequencer::read_pipe_state(self, pipe)
    }

    /// Busy-waits for the start of the next vertical blank on `pipe`.
    pub fn wait_vblank(&mut self, pipe: Pipe) -> Result<bool, Error<I::Error>> {
        sequencer::wait_vblank(self, pipe)
    }

    /// Runs one htotal calibration step by hand. See [`tuning::tune_step`].
    pub fn tune_step<S>(
        &mut self,
        pipe: Pipe,
        timing: &mut TimingDescriptor,
        surfaces: &mut S,
    ) -> Result<TuneOutcome, Error<I::Error>>
    where
        S: Surfaces<Error = I::Error>,
    {
        tuning::tune_step(self, pipe, timing, surfaces)
    }

    pub fn reset_tuning<S>(&mut self, pipe: Pipe, surfaces: &mut S) -> Result<(), Error<I::Error>>
    where
        S: Surfaces<Error = I::Error>,
    {
        tuning::reset_tuning(self, pipe, surfaces)
    }
}
