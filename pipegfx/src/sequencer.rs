//! Ordering of pipe, plane and port transitions.
//!
//! Each pipe moves through [`SequencerState`] in a fixed order as it is
//! brought up, and back down in reverse. The DPLL is never running while its
//! pipe holds stale timings, and a plane is never left scanning out after
//! the port it feeds has been turned off.
//!
//! Concurrent calls for different pipes are not supported: several of the
//! erratum workarounds here touch the other pipe's registers, so callers
//! must serialize all calls on an [`Engine`].

use crate::clocks::{self, ClockParameters, DpllRegisters, DPLL_VCO_ENABLE};
use crate::config::{ClockFailurePolicy, Config};
use crate::error::Error;
use crate::interface::{Aperture, Interface};
use crate::low_level::LowLevel;
use crate::models::Model;
use crate::plane::{self, Framebuffer, PLANE_ENABLE};
use crate::platform::{Clock, PortDriver, Surfaces};
use crate::port;
use crate::registers::Register;
use crate::timing::{self, TimingDescriptor};
use crate::tuning::{self, TuneOutcome, TuningWorkaroundState};
use crate::vga::{self, VgaMode};
use crate::waiter::{poll, settle, WaitFor};
use crate::{Engine, Pipe, PortType, PowerState};

/// Time for the DPLL to lock after its oscillator is enabled.
pub const DPLL_SETTLE_US: u32 = 150;

/// `DSPCHICKEN` bits pulsed by the clipping fix, one per pipe.
pub const CHICKEN_CLIP_A: u32 = 1 << 14;
pub const CHICKEN_CLIP_B: u32 = 1 << 15;

/// `DSPCHICKEN` bit toggled after a port comes up on revisions that need
/// the clipping fix, which flushes the display FIFO.
pub const CHICKEN_FIFO_FLUSH: u32 = 1 << 13;

/// `PIPESTAT` bit reporting the start of vertical blank. Write one to clear.
pub const PIPESTAT_VBLANK: u32 = 1 << 1;

const PALETTE_ENTRIES: u32 = 256;

/// Where a pipe is in its bring-up sequence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SequencerState {
    Disabled,
    /// The DPLL and timings are programmed and the pipe is running.
    PipeArmed,
    /// A plane is scanning out onto the running pipe.
    PlaneArmed,
    /// The port is carrying the pipe's signal.
    PortArmed,
    /// Post-port fixups are done.
    Enabled,
}

/// What a mode set should do.
#[derive(Debug)]
pub enum ModeSet<'a> {
    On {
        port: PortType,
        /// The calibration loop records its result in here.
        timing: &'a mut TimingDescriptor,
        framebuffer: Framebuffer,
    },
    Off,
}

/// Details of a completed mode set.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ModeSetReport {
    /// The PLL configuration programmed, when enabling.
    pub clock: Option<ClockParameters>,
    /// `true` if the clock is the model's fallback, substituted because the
    /// requested one couldn't be synthesized.
    pub fallback_clock: bool,
    /// How the htotal calibration finished, when enabling.
    pub tuning: Option<TuneOutcome>,
    /// The number of calibration steps that asked for another try.
    pub tuning_iterations: u32,
}

/// Which plane is feeding a pipe.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlaneKind {
    Primary,
    Vga,
}

/// A pipe's state as the hardware reports it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PipeState {
    pub enabled: bool,
    pub dpll_enabled: bool,
    pub plane: Option<PlaneKind>,
}

/// The mode a pipe was most recently enabled with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ActiveMode {
    pub port: PortType,
    pub timing: TimingDescriptor,
    pub clock: ClockParameters,
    pub framebuffer: Framebuffer,
    pub vga: bool,
}

/// Everything the engine remembers about one pipe.
#[derive(Debug)]
pub(crate) struct PipeContext {
    pub(crate) state: SequencerState,
    pub(crate) active: Option<ActiveMode>,
    pub(crate) tuning: TuningWorkaroundState,
}

impl PipeContext {
    pub(crate) fn new() -> Self {
        Self {
            state: SequencerState::Disabled,
            active: None,
            tuning: TuningWorkaroundState::default(),
        }
    }
}

fn transition<M, I, C>(engine: &mut Engine<M, I, C>, pipe: Pipe, to: SequencerState)
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let ctx = &mut engine.pipes[pipe.index()];
    log::debug!("pipe {:?}: {:?} -> {:?}", pipe, ctx.state, to);
    ctx.state = to;
}

fn invalid<E>(pipe: Pipe, state: SequencerState) -> Error<E> {
    Error::InvalidSequence { pipe, state }
}

/// Chooses the PLL configuration for a mode, before anything is written.
fn resolve_clock<M: Model, E>(
    config: &Config,
    port: PortType,
    timing: &TimingDescriptor,
) -> Result<(ClockParameters, bool), Error<E>> {
    if timing.flags.legacy_vesa {
        return Ok((M::fallback_clock(port), false));
    }
    let ref_freq_khz = config.ref_freq_khz.unwrap_or_else(|| M::ref_freq_khz(port));
    match clocks::synthesize::<M>(
        timing.dot_clock_khz,
        ref_freq_khz,
        port,
        config.effective_tolerance_ppm(),
    ) {
        Ok(params) => Ok((params, false)),
        Err(fail) => match config.clock_policy {
            ClockFailurePolicy::Refuse => Err(Error::Convergence(fail)),
            ClockFailurePolicy::UseFallback => {
                let fallback = M::fallback_clock(port);
                log::warn!(
                    "{}; substituting fallback clock of {} kHz",
                    fail,
                    fallback.dot_clock_khz
                );
                Ok((fallback, true))
            }
        },
    }
}

fn wait_pipe_state<M, I, C>(
    ll: &mut LowLevel<M, I>,
    clock: &mut C,
    config: &Config,
    apertures: &[Aperture],
    pipe: Pipe,
    running: bool,
) -> Result<bool, Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let what = if running {
        WaitFor::PipeEnabled
    } else {
        WaitFor::PipeDisabled
    };
    let r = poll(clock, what.timeout_us(), || {
        for aperture in apertures {
            if ll.bits_set(*aperture, pipe, Register::PIPECONF, M::PIPE_STATE)? != running {
                return Ok(false);
            }
        }
        Ok(true)
    });
    settle(config.timeout_policy, pipe, what, r)
}

fn enable_pipe<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    port: PortType,
    interlace: bool,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let mut conf = M::PIPE_ENABLE;
    if interlace {
        conf |= M::PIPE_INTERLACE;
    }
    engine.ll.wr_all(M::apertures(port), pipe, Register::PIPECONF, conf)?;
    wait_pipe_state(
        &mut engine.ll,
        &mut engine.clock,
        &engine.config,
        &[M::port_aperture(port)],
        pipe,
        true,
    )?;
    Ok(())
}

fn disable_pipe<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    port: PortType,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    if M::needs_other_pipe_disable(engine.config.revision) {
        let other = M::port_aperture(port).other();
        log::debug!("pipe {:?}: forcing off {:?} instance first", pipe, other);
        engine.ll.wr(other, pipe, Register::PIPECONF, 0)?;
    }
    engine.ll.wr_all(M::apertures(port), pipe, Register::PIPECONF, 0)?;
    wait_pipe_state(
        &mut engine.ll,
        &mut engine.clock,
        &engine.config,
        &[M::port_aperture(port)],
        pipe,
        false,
    )?;
    Ok(())
}

// Stops the pipe in both register windows and pulses the clipping chicken
// bits before the pipe is reprogrammed.
fn clip_fix<M, I, C>(engine: &mut Engine<M, I, C>, pipe: Pipe) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    static BOTH: [Aperture; 2] = [Aperture::Primary, Aperture::Secondary];
    log::debug!("pipe {:?}: applying clipping fix", pipe);
    engine.ll.wr_all(&BOTH, pipe, Register::PIPECONF, 0)?;
    wait_pipe_state(
        &mut engine.ll,
        &mut engine.clock,
        &engine.config,
        &BOTH,
        pipe,
        false,
    )?;
    let bits = CHICKEN_CLIP_A | CHICKEN_CLIP_B;
    engine
        .ll
        .modify(Aperture::Primary, pipe, Register::DSPCHICKEN, 0, bits)?;
    engine
        .ll
        .modify(Aperture::Primary, pipe, Register::DSPCHICKEN, bits, 0)?;
    Ok(())
}

fn program_clock_and_timing<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    port: PortType,
    timing: &TimingDescriptor,
    clock: &ClockParameters,
    dpll: DpllRegisters,
    vga_mode: Option<&VgaMode>,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let apertures = M::apertures(port);
    let port_aperture = M::port_aperture(port);

    // The oscillator stays off until the timings it will drive are in place.
    engine
        .ll
        .wr(port_aperture, pipe, Register::DPLL, dpll.dpll)?;
    engine.ll.wr(port_aperture, pipe, Register::FP0, dpll.fp)?;

    match vga_mode {
        Some(mode) => vga::program(&mut engine.ll, apertures, pipe, mode)?,
        None => {
            let t = tuning::effective_timing::<M>(
                &engine.config,
                &engine.pipes[pipe.index()].tuning,
                port,
                timing,
                clock,
            );
            timing::program_timing(&mut engine.ll, apertures, pipe, &t, clock)?;
        }
    }

    engine.ll.wr(
        port_aperture,
        pipe,
        Register::DPLL,
        dpll.dpll | DPLL_VCO_ENABLE,
    )?;
    engine.clock.delay_us(DPLL_SETTLE_US);
    Ok(())
}

/// Enable path: everything up to a scanning plane, then calibration.
pub(crate) fn mode_set_on<M, I, C, S>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    port: PortType,
    timing: &mut TimingDescriptor,
    framebuffer: Framebuffer,
    surfaces: &mut S,
) -> Result<ModeSetReport, Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
    S: Surfaces<Error = I::Error>,
{
    if !M::supports(pipe, port) {
        return Err(Error::Unsupported);
    }
    let state = engine.pipes[pipe.index()].state;
    if state != SequencerState::Disabled {
        return Err(invalid(pipe, state));
    }

    // Everything that can refuse the mode happens before the first write.
    let vga_mode = if timing.flags.legacy_vesa {
        match vga::lookup(timing.mode_number) {
            Some(mode) => Some(mode),
            None => return Err(Error::UnknownVgaMode(timing.mode_number)),
        }
    } else {
        None
    };
    let (clock, fallback_clock) = resolve_clock::<M, I::Error>(&engine.config, port, timing)?;
    let dpll = M::encode_dpll(port, &clock).ok_or(Error::Unsupported)?;

    // Calibration progress belongs to the previous mode.
    tuning::discard_progress(&mut engine.pipes[pipe.index()].tuning, surfaces)?;

    log::debug!(
        "pipe {:?}: enabling {}x{} on {:?} ({})",
        pipe,
        timing.width,
        timing.height,
        port,
        M::NAME
    );

    if vga_mode.is_none() && vga::is_active(&mut engine.ll)? {
        vga::disable_plane(&mut engine.ll)?;
        engine.clock.delay_us(vga::VGA_DISABLE_DELAY_US);
    }

    if M::needs_clip_fix(engine.config.revision, port) {
        clip_fix(engine, pipe)?;
    }

    program_clock_and_timing(engine, pipe, port, timing, &clock, dpll, vga_mode)?;
    // Recorded before the pipe is started, so that a failed start can still
    // be undone with a mode set to off.
    engine.pipes[pipe.index()].active = Some(ActiveMode {
        port,
        timing: *timing,
        clock,
        framebuffer,
        vga: vga_mode.is_some(),
    });
    transition(engine, pipe, SequencerState::PipeArmed);
    enable_pipe(engine, pipe, port, timing.flags.interlace)?;

    let apertures = M::apertures(port);
    match vga_mode {
        Some(_) => vga::enable_plane(&mut engine.ll, pipe)?,
        None => {
            plane::program(&mut engine.ll, apertures, pipe, &framebuffer)?;
            plane::enable(&mut engine.ll, apertures, pipe, &framebuffer)?;
        }
    }
    transition(engine, pipe, SequencerState::PlaneArmed);

    let mut tuning_iterations = 0;
    let outcome = loop {
        match tuning::tune_step(engine, pipe, timing, surfaces)? {
            TuneOutcome::Continue => tuning_iterations += 1,
            other => break other,
        }
    };
    if let Some(active) = engine.pipes[pipe.index()].active.as_mut() {
        active.timing = *timing;
    }

    Ok(ModeSetReport {
        clock: Some(clock),
        fallback_clock,
        tuning: Some(outcome),
        tuning_iterations,
    })
}

fn disable_plane<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    active: &ActiveMode,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    if active.vga {
        vga::disable_plane(&mut engine.ll)?;
    } else {
        plane::disable(
            &mut engine.ll,
            M::apertures(active.port),
            pipe,
            &active.framebuffer,
        )?;
    }
    wait_vblank(engine, pipe)?;
    Ok(())
}

/// Disable path: plane, pipe, then DPLL.
pub(crate) fn mode_set_off<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
) -> Result<ModeSetReport, Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let ctx = &engine.pipes[pipe.index()];
    let state = ctx.state;
    let active = match (state, ctx.active) {
        (SequencerState::Disabled, _) => return Ok(ModeSetReport::default()),
        (SequencerState::PortArmed, _) | (SequencerState::Enabled, _) | (_, None) => {
            return Err(invalid(pipe, state))
        }
        (_, Some(active)) => active,
    };

    if state == SequencerState::PlaneArmed {
        disable_plane(engine, pipe, &active)?;
        transition(engine, pipe, SequencerState::PipeArmed);
    }

    disable_pipe(engine, pipe, active.port)?;
    engine.ll.modify(
        M::port_aperture(active.port),
        pipe,
        Register::DPLL,
        DPLL_VCO_ENABLE,
        0,
    )?;

    engine.pipes[pipe.index()].active = None;
    transition(engine, pipe, SequencerState::Disabled);
    Ok(ModeSetReport::default())
}

pub(crate) fn program_port<M, I, C, P>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    port: PortType,
    power: PowerState,
    driver: &mut P,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
    P: PortDriver<Error = I::Error>,
{
    let ctx = &engine.pipes[pipe.index()];
    let state = ctx.state;
    let active = match ctx.active {
        Some(active) if active.port == port => active,
        Some(_) => return Err(Error::Unsupported),
        None => return Err(invalid(pipe, state)),
    };

    match power {
        PowerState::On => {
            if state != SequencerState::PlaneArmed {
                return Err(invalid(pipe, state));
            }
            port::enable(&mut engine.ll, pipe, port, &active.timing, driver)?;
            transition(engine, pipe, SequencerState::PortArmed);
        }
        PowerState::Off => {
            match state {
                SequencerState::PortArmed | SequencerState::Enabled => {}
                _ => return Err(invalid(pipe, state)),
            }
            port::disable(&mut engine.ll, pipe, port, driver)?;
            // The plane must not outlive the port it feeds.
            disable_plane(engine, pipe, &active)?;
            transition(engine, pipe, SequencerState::PipeArmed);
        }
    }
    Ok(())
}

pub(crate) fn post_program_port<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    port: PortType,
    status: PowerState,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let state = engine.pipes[pipe.index()].state;
    if status == PowerState::Off {
        log::debug!("pipe {:?}: no fixups after {:?} off", pipe, port);
        return Ok(());
    }
    if state != SequencerState::PortArmed {
        return Err(invalid(pipe, state));
    }

    // Linear ramp, so that indexed and gamma-corrected formats start out
    // neutral.
    let base = Register::PALETTE.offset_for(pipe);
    for i in 0..PALETTE_ENTRIES {
        engine
            .ll
            .wr32(Aperture::Primary, base + i * 4, i * 0x0001_0101)?;
    }

    if M::needs_clip_fix(engine.config.revision, port) {
        engine.ll.modify(
            Aperture::Primary,
            pipe,
            Register::DSPCHICKEN,
            0,
            CHICKEN_FIFO_FLUSH,
        )?;
        engine.ll.modify(
            Aperture::Primary,
            pipe,
            Register::DSPCHICKEN,
            CHICKEN_FIFO_FLUSH,
            0,
        )?;
    }

    transition(engine, pipe, SequencerState::Enabled);
    Ok(())
}

/// Turns a programmed pipe's timing generator on or off without changing
/// its mode or its sequencer state.
pub(crate) fn set_pipe_power<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    power: PowerState,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let ctx = &engine.pipes[pipe.index()];
    let active = match ctx.active {
        Some(active) => active,
        None => return Err(invalid(pipe, ctx.state)),
    };
    match power {
        PowerState::On => enable_pipe(engine, pipe, active.port, active.timing.flags.interlace),
        PowerState::Off => disable_pipe(engine, pipe, active.port),
    }
}

fn status_aperture<M, I, C>(engine: &Engine<M, I, C>, pipe: Pipe) -> Aperture
where
    M: Model,
    I: Interface,
    C: Clock,
{
    match engine.pipes[pipe.index()].active {
        Some(active) => M::port_aperture(active.port),
        None => Aperture::Primary,
    }
}

pub(crate) fn read_pipe_state<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
) -> Result<PipeState, Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let aperture = status_aperture(engine, pipe);
    let ll = &mut engine.ll;
    let enabled = ll.bits_set(aperture, pipe, Register::PIPECONF, M::PIPE_STATE)?;
    let dpll_enabled = ll.bits_set(aperture, pipe, Register::DPLL, DPLL_VCO_ENABLE)?;
    let plane = if ll.bits_set(Aperture::Primary, pipe, Register::DSPCNTR, PLANE_ENABLE)? {
        Some(PlaneKind::Primary)
    } else if vga::active_pipe(ll)? == Some(pipe) {
        Some(PlaneKind::Vga)
    } else {
        None
    };
    Ok(PipeState {
        enabled,
        dpll_enabled,
        plane,
    })
}

/// Waits for the start of the next vertical blank on `pipe`.
///
/// Returns `false` if none arrived in time and the timeout policy says to
/// carry on regardless.
pub(crate) fn wait_vblank<M, I, C>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
) -> Result<bool, Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
{
    let aperture = status_aperture(engine, pipe);
    let Engine {
        ll, clock, config, ..
    } = engine;
    ll.wr(aperture, pipe, Register::PIPESTAT, PIPESTAT_VBLANK)?;
    let r = poll(clock, WaitFor::VBlank.timeout_us(), || {
        ll.bits_set(aperture, pipe, Register::PIPESTAT, PIPESTAT_VBLANK)
    });
    settle(config.timeout_policy, pipe, WaitFor::VBlank, r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DisplayConfig, TimeoutPolicy};
    use crate::interface::fake::{Access, FakeClock, FakeDevice, FakeInterface, PortCall};
    use crate::models::plb::PLB;
    use crate::models::tnc::{REV_A0, REV_B1, TNC};
    use crate::plane::Depth;
    use crate::port::{LVDS_PORT_ENABLE, SDVO_ENABLE};
    use std::vec::Vec;

    const FB: Framebuffer = Framebuffer::new(0x0010_0000, 4096, Depth::Bpp32);

    fn on<'a>(port: PortType, timing: &'a mut TimingDescriptor) -> ModeSet<'a> {
        ModeSet::On {
            port,
            timing,
            framebuffer: FB,
        }
    }

    fn written(writes: &[Access], aperture: Aperture, reg: Register, pipe: Pipe) -> Vec<u32> {
        let offset = reg.offset_for(pipe);
        writes
            .iter()
            .filter(|w| w.aperture == aperture && w.offset == offset)
            .map(|w| w.value)
            .collect()
    }

    fn position(writes: &[Access], offset: u32, pred: impl Fn(u32) -> bool) -> usize {
        writes
            .iter()
            .position(|w| w.offset == offset && pred(w.value))
            .unwrap()
    }

    #[test]
    fn test_full_sequence_lvds() {
        let dev = FakeDevice::new(PLB);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), Config::new());
        let mut surfaces = dev.surfaces();
        let mut driver = dev.port_driver();
        let mut t = TimingDescriptor::MODE_1024X768_60;

        let report = eng
            .mode_set(Pipe::B, on(PortType::Lvds, &mut t), &mut surfaces)
            .unwrap();
        assert_eq!(report.tuning, Some(TuneOutcome::Bypassed));
        assert!(!report.fallback_clock);
        assert_eq!(eng.sequencer_state(Pipe::B), SequencerState::PlaneArmed);

        eng.program_port(Pipe::B, PortType::Lvds, PowerState::On, &mut driver)
            .unwrap();
        assert_eq!(eng.sequencer_state(Pipe::B), SequencerState::PortArmed);
        eng.post_program_port(Pipe::B, PortType::Lvds, PowerState::On)
            .unwrap();
        assert_eq!(eng.sequencer_state(Pipe::B), SequencerState::Enabled);

        let st = eng.read_pipe_state(Pipe::B).unwrap();
        assert_eq!(
            st,
            PipeState {
                enabled: true,
                dpll_enabled: true,
                plane: Some(PlaneKind::Primary),
            }
        );
        assert_eq!(
            dev.port_calls(),
            vec![
                PortCall::SetMode {
                    width: 1024,
                    height: 768,
                    pipe_mask: 2,
                },
                PortCall::SetPower(PowerState::On),
            ]
        );

        let writes = dev.writes();
        // The VGA plane goes first, then the DPLL is written with its
        // oscillator off before any timing, and only enabled afterwards.
        let vga_off = position(&writes, Register::VGACNTRL.offset(), |v| v == vga::VGA_DISABLE);
        let dpll = Register::DPLL.offset_for(Pipe::B);
        let dpll_off = position(&writes, dpll, |v| v & DPLL_VCO_ENABLE == 0);
        let htotal = position(&writes, Register::HTOTAL.offset_for(Pipe::B), |_| true);
        let pipesrc = position(&writes, Register::PIPESRC.offset_for(Pipe::B), |_| true);
        let dpll_on = position(&writes, dpll, |v| v & DPLL_VCO_ENABLE != 0);
        let pipe_on = position(&writes, Register::PIPECONF.offset_for(Pipe::B), |_| true);
        let plane_on = position(&writes, Register::DSPCNTR.offset_for(Pipe::B), |v| {
            v & PLANE_ENABLE != 0
        });
        let port_on = position(&writes, Register::LVDS.offset(), |v| {
            v & LVDS_PORT_ENABLE != 0
        });
        assert!(vga_off < dpll_off);
        assert!(dpll_off < htotal);
        assert!(htotal < pipesrc);
        assert!(pipesrc < dpll_on);
        assert!(dpll_on < pipe_on);
        assert!(pipe_on < plane_on);
        assert!(plane_on < port_on);

        // Palette ramp.
        let pal = Register::PALETTE.offset_for(Pipe::B);
        assert_eq!(
            dev.reg(Aperture::Primary, pal + 255 * 4),
            0x00ff_ffff
        );

        // Tear down in reverse.
        dev.take_writes();
        eng.program_port(Pipe::B, PortType::Lvds, PowerState::Off, &mut driver)
            .unwrap();
        assert_eq!(eng.sequencer_state(Pipe::B), SequencerState::PipeArmed);
        eng.mode_set(Pipe::B, ModeSet::Off, &mut surfaces).unwrap();
        assert_eq!(eng.sequencer_state(Pipe::B), SequencerState::Disabled);

        let writes = dev.writes();
        let port_off = position(&writes, Register::LVDS.offset(), |v| {
            v & LVDS_PORT_ENABLE == 0
        });
        let plane_off = position(&writes, Register::DSPCNTR.offset_for(Pipe::B), |v| {
            v & PLANE_ENABLE == 0
        });
        let pipe_off = position(&writes, Register::PIPECONF.offset_for(Pipe::B), |v| v == 0);
        let dpll_off = position(&writes, dpll, |v| v & DPLL_VCO_ENABLE == 0);
        assert!(port_off < plane_off);
        assert!(plane_off < pipe_off);
        assert!(pipe_off < dpll_off);

        let st = eng.read_pipe_state(Pipe::B).unwrap();
        assert!(!st.enabled);
        assert!(!st.dpll_enabled);
        assert_eq!(st.plane, None);
        assert_eq!(dev.port_calls().last(), Some(&PortCall::SetPower(PowerState::Off)));
    }

    #[test]
    fn test_disable_enable_is_reproducible() {
        let dev = FakeDevice::new(TNC);
        let mut config = Config::new();
        config.revision(REV_B1);
        let mut eng: Engine<TNC, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), config);
        let mut surfaces = dev.surfaces();
        let mut t = TimingDescriptor::MODE_800X600_60;

        eng.mode_set(Pipe::B, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();

        let mut traces = Vec::new();
        for _ in 0..2 {
            eng.mode_set(Pipe::B, ModeSet::Off, &mut surfaces).unwrap();
            dev.take_writes();
            eng.mode_set(Pipe::B, on(PortType::Sdvo, &mut t), &mut surfaces)
                .unwrap();
            traces.push(dev.take_writes());
        }
        assert!(!traces[0].is_empty());
        assert_eq!(traces[0], traces[1]);

        // Timing registers went to both windows of the SDVO pipe.
        assert_eq!(
            written(&traces[0], Aperture::Primary, Register::HTOTAL, Pipe::B),
            written(&traces[0], Aperture::Secondary, Register::HTOTAL, Pipe::B),
        );
        // The DPLL went only to the window carrying the port.
        assert!(written(&traces[0], Aperture::Primary, Register::DPLL, Pipe::B).is_empty());
    }

    #[test]
    fn test_clock_failure_writes_nothing() {
        let dev = FakeDevice::new(PLB);
        let mut config = Config::new();
        config.clock_tolerance_ppm(0);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), config);
        let mut surfaces = dev.surfaces();
        let mut t = TimingDescriptor::MODE_640X480_60;

        match eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces) {
            Err(Error::Convergence(fail)) => assert_eq!(fail.target_khz, 25_175),
            other => panic!("unexpected {:?}", other),
        }
        assert!(dev.writes().is_empty());
        assert_eq!(eng.sequencer_state(Pipe::A), SequencerState::Disabled);

        eng.config_mut()
            .clock_policy(ClockFailurePolicy::UseFallback);
        let report = eng
            .mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        assert!(report.fallback_clock);
        assert_eq!(report.clock, Some(PLB::fallback_clock(PortType::Sdvo)));
    }

    #[test]
    fn test_pipe_timeout_policies() {
        let dev = FakeDevice::new(PLB);
        dev.set_stuck_pipes(true);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), Config::new());
        let mut surfaces = dev.surfaces();
        let mut t = TimingDescriptor::MODE_640X480_60;

        match eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces) {
            Err(Error::Timeout(timeout)) => {
                assert_eq!(timeout.what, WaitFor::PipeEnabled);
                assert_eq!(timeout.pipe, Pipe::A);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(dev.now_us() >= 50_000);

        let dev = FakeDevice::new(PLB);
        dev.set_stuck_pipes(true);
        let mut config = Config::new();
        config.timeout_policy(TimeoutPolicy::LogAndContinue);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), config);
        let mut surfaces = dev.surfaces();
        eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        assert_eq!(eng.sequencer_state(Pipe::A), SequencerState::PlaneArmed);
        assert!(!eng.wait_vblank(Pipe::A).unwrap());
    }

    #[test]
    fn test_borrowed_clock() {
        let dev = FakeDevice::new(PLB);
        let mut clock = dev.clock();
        let mut eng: Engine<PLB, FakeInterface, &mut FakeClock> =
            Engine::new(dev.interface(), &mut clock, Config::new());
        let mut surfaces = dev.surfaces();
        let mut t = TimingDescriptor::MODE_640X480_60;
        eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        assert!(eng.wait_vblank(Pipe::A).unwrap());
        drop(eng);
        assert!(clock.now_us() >= DPLL_SETTLE_US as u64);
    }

    #[test]
    fn test_failed_start_can_be_undone() {
        let dev = FakeDevice::new(PLB);
        dev.set_stuck_pipes(true);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), Config::new());
        let mut surfaces = dev.surfaces();
        let mut t = TimingDescriptor::MODE_640X480_60;
        let aperture = PLB::port_aperture(PortType::Sdvo);
        let dpll = Register::DPLL.offset_for(Pipe::A);
        let pipeconf = Register::PIPECONF.offset_for(Pipe::A);

        assert!(eng
            .mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .is_err());
        // The DPLL and pipe were left running, and the engine knows it.
        assert_ne!(dev.reg(aperture, dpll) & DPLL_VCO_ENABLE, 0);
        assert_ne!(dev.reg(aperture, pipeconf) & PLB::PIPE_ENABLE, 0);
        assert_eq!(eng.sequencer_state(Pipe::A), SequencerState::PipeArmed);

        dev.take_writes();
        eng.mode_set(Pipe::A, ModeSet::Off, &mut surfaces).unwrap();
        assert!(!dev.writes().is_empty());
        assert_eq!(dev.reg(aperture, dpll) & DPLL_VCO_ENABLE, 0);
        assert_eq!(dev.reg(aperture, pipeconf) & PLB::PIPE_ENABLE, 0);
        assert_eq!(eng.sequencer_state(Pipe::A), SequencerState::Disabled);

        // With the pipe unstuck, the same mode comes up normally.
        dev.set_stuck_pipes(false);
        eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        assert_eq!(eng.sequencer_state(Pipe::A), SequencerState::PlaneArmed);
    }

    #[test]
    fn test_invalid_sequences() {
        let dev = FakeDevice::new(PLB);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), Config::new());
        let mut surfaces = dev.surfaces();
        let mut driver = dev.port_driver();
        let mut t = TimingDescriptor::MODE_640X480_60;

        // No port before a plane.
        match eng.program_port(Pipe::A, PortType::Sdvo, PowerState::On, &mut driver) {
            Err(Error::InvalidSequence { state, .. }) => {
                assert_eq!(state, SequencerState::Disabled)
            }
            other => panic!("unexpected {:?}", other),
        }

        // PLB can't feed LVDS from pipe A.
        assert!(matches!(
            eng.mode_set(Pipe::A, on(PortType::Lvds, &mut t), &mut surfaces),
            Err(Error::Unsupported)
        ));

        eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        // Enabling twice.
        assert!(matches!(
            eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces),
            Err(Error::InvalidSequence { .. })
        ));
        eng.program_port(Pipe::A, PortType::Sdvo, PowerState::On, &mut driver)
            .unwrap();
        // The port must come down before the pipe.
        assert!(matches!(
            eng.mode_set(Pipe::A, ModeSet::Off, &mut surfaces),
            Err(Error::InvalidSequence { .. })
        ));
        // Disabling an idle pipe does nothing.
        dev.take_writes();
        eng.mode_set(Pipe::B, ModeSet::Off, &mut surfaces).unwrap();
        assert!(dev.writes().is_empty());
    }

    #[test]
    fn test_clip_fix_and_other_pipe_erratum() {
        let dev = FakeDevice::new(TNC);
        let mut config = Config::new();
        config.revision(REV_A0);
        let mut eng: Engine<TNC, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), config);
        let mut surfaces = dev.surfaces();
        let mut driver = dev.port_driver();
        dev.set_bridge(true);
        let mut t = TimingDescriptor::MODE_800X600_60;

        eng.mode_set(Pipe::B, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        let writes = dev.take_writes();
        let chicken = written(&writes, Aperture::Primary, Register::DSPCHICKEN, Pipe::B);
        assert_eq!(chicken, vec![CHICKEN_CLIP_A | CHICKEN_CLIP_B, 0]);
        // Both windows' pipes were stopped before the DPLL was touched.
        let first_dpll = position(&writes, Register::DPLL.offset_for(Pipe::B), |_| true);
        let stops: Vec<usize> = writes
            .iter()
            .enumerate()
            .filter(|(_, w)| w.offset == Register::PIPECONF.offset_for(Pipe::B) && w.value == 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(stops.len(), 2);
        assert!(stops.iter().all(|i| *i < first_dpll));

        eng.program_port(Pipe::B, PortType::Sdvo, PowerState::On, &mut driver)
            .unwrap();
        assert_eq!(dev.port_calls(), vec![PortCall::BridgeBringUp]);
        assert_eq!(
            dev.reg(Aperture::Secondary, Register::SDVO_CTRL.offset()) & SDVO_ENABLE,
            SDVO_ENABLE
        );
        dev.take_writes();
        eng.post_program_port(Pipe::B, PortType::Sdvo, PowerState::On)
            .unwrap();
        let writes = dev.take_writes();
        let chicken = written(&writes, Aperture::Primary, Register::DSPCHICKEN, Pipe::B);
        assert_eq!(chicken, vec![CHICKEN_FIFO_FLUSH, 0]);

        eng.program_port(Pipe::B, PortType::Sdvo, PowerState::Off, &mut driver)
            .unwrap();
        dev.take_writes();
        eng.mode_set(Pipe::B, ModeSet::Off, &mut surfaces).unwrap();
        let writes = dev.take_writes();
        // The primary window's instance goes first, then both in order.
        let conf = Register::PIPECONF.offset_for(Pipe::B);
        let stops: Vec<Aperture> = writes
            .iter()
            .filter(|w| w.offset == conf)
            .map(|w| w.aperture)
            .collect();
        assert_eq!(
            stops,
            vec![Aperture::Primary, Aperture::Primary, Aperture::Secondary]
        );
    }

    #[test]
    fn test_legacy_vga_mode() {
        let dev = FakeDevice::new(PLB);
        let mut eng: Engine<PLB, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), Config::new());
        let mut surfaces = dev.surfaces();

        let mut unknown = TimingDescriptor::legacy_vga(0x6a, TimingDescriptor::MODE_800X600_60);
        assert!(matches!(
            eng.mode_set(Pipe::A, on(PortType::Sdvo, &mut unknown), &mut surfaces),
            Err(Error::UnknownVgaMode(0x6a))
        ));
        assert!(dev.writes().is_empty());

        let mut t = TimingDescriptor::legacy_vga(0x13, TimingDescriptor::MODE_640X480_60);
        let report = eng
            .mode_set(Pipe::A, on(PortType::Sdvo, &mut t), &mut surfaces)
            .unwrap();
        assert_eq!(report.clock, Some(PLB::fallback_clock(PortType::Sdvo)));
        assert!(!report.fallback_clock);
        assert_eq!(report.tuning, Some(TuneOutcome::Bypassed));

        let src = Register::PIPESRC.offset_for(Pipe::A);
        assert_eq!(dev.reg(Aperture::Primary, src), (319 << 16) | 199);
        assert_eq!(
            eng.read_pipe_state(Pipe::A).unwrap().plane,
            Some(PlaneKind::Vga)
        );
        // The primary plane was never touched.
        let writes = dev.writes();
        assert!(written(&writes, Aperture::Primary, Register::DSPCNTR, Pipe::A).is_empty());
    }

    #[test]
    fn test_pipe_power_toggle() {
        let dev = FakeDevice::new(TNC);
        let mut eng: Engine<TNC, FakeInterface, FakeClock> =
            Engine::new(dev.interface(), dev.clock(), Config::new());
        let mut surfaces = dev.surfaces();
        let mut t = TimingDescriptor::MODE_800X600_60;
        // The LVDS PLL only gets within about 0.8% of 40 MHz.
        eng.config_mut()
            .display_config(DisplayConfig::Single)
            .clock_tolerance_ppm(20_000);

        assert!(matches!(
            eng.set_pipe_power(Pipe::A, PowerState::Off),
            Err(Error::InvalidSequence { .. })
        ));
        eng.mode_set(Pipe::A, on(PortType::Lvds, &mut t), &mut surfaces)
            .unwrap();
        eng.set_pipe_power(Pipe::A, PowerState::Off).unwrap();
        assert!(!eng.read_pipe_state(Pipe::A).unwrap().enabled);
        assert_eq!(eng.sequencer_state(Pipe::A), SequencerState::PlaneArmed);
        eng.set_pipe_power(Pipe::A, PowerState::On).unwrap();
        assert!(eng.read_pipe_state(Pipe::A).unwrap().enabled);
        assert!(eng.wait_vblank(Pipe::A).unwrap());
    }
}
