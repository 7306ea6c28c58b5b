//! Closed-loop htotal calibration.
//!
//! One stepping of Tunnel Creek clips or flickers on its SDVO output when
//! both pipes are running unless the horizontal total is nudged away from
//! its nominal value, and the right amount varies from board to board. The
//! calibration renders a known pattern into a scratch surface, scans it out,
//! and compares the CRC the hardware computed over what it actually sent
//! with a CRC computed in software over what it should have sent. Until they
//! agree, htotal is stepped up by one and the pipe retimed.
//!
//! Each call to [`tune_step`] runs one such comparison. The sequencer drives
//! it to completion at the end of every mode set, but it can also be driven
//! by hand through [`Engine::tune_step`](crate::Engine::tune_step).

use crate::clocks::ClockParameters;
use crate::config::Config;
use crate::crc::{Accumulator, PixelCrc, CRC_MASK};
use crate::error::Error;
use crate::interface::{Aperture, Interface};
use crate::low_level::LowLevel;
use crate::models::Model;
use crate::plane::{self, Depth, Framebuffer};
use crate::platform::{Clock, Rect, Surface, Surfaces};
use crate::registers::Register;
use crate::sequencer::SequencerState;
use crate::timing::{self, TimingDescriptor, TunedHtotal};
use crate::waiter::{poll, settle, WaitFor};
use crate::{Engine, Pipe, PortType};

/// The number of mismatching comparisons after which calibration gives up.
pub const LIMIT_TOTAL_CHECK_DISPLAY: u32 = 20;

/// How far htotal moves after each mismatch.
pub const HTOTAL_TUNING_STEP: i16 = 1;

/// `CRC_CTRL` value starting a capture.
pub const CRC_ARM: u32 = 0x8000_0000;
/// `CRC_CTRL` value stopping the CRC unit.
pub const CRC_DISARM: u32 = 0;
/// `CRC_CTRL` bit set by the hardware once the result registers are valid.
pub const CRC_READY: u32 = 1 << 30;

/// Extra time to let the result registers settle after the ready bit.
pub const CRC_SETTLE_US: u32 = 20_000;

/// Test pattern colors for the left and right halves of the screen.
pub const PATTERN_LEFT: u32 = 0x00ff_0000;
pub const PATTERN_RIGHT: u32 = 0x0000_00ff;

const READBACK_CHUNK: usize = 64;

/// The result of one calibration step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TuneOutcome {
    /// The checksums disagreed and htotal has been stepped. Call again.
    Continue,

    /// The checksums agree. The htotal in use has been recorded in the
    /// timing's [`reserved`](crate::timing::TimingDescriptor::reserved)
    /// slot.
    Converged,

    /// The checksums never agreed. Calibration is off for this pipe until
    /// [`Engine::reset_tuning`](crate::Engine::reset_tuning).
    Abandoned,

    /// Calibration doesn't apply to this pipe's current configuration.
    Bypassed,
}

/// Per-pipe calibration progress.
#[derive(Debug, Default)]
pub struct TuningWorkaroundState {
    iterations: u32,
    delta: i16,
    reference_crc: Option<PixelCrc>,
    tuned: bool,
    abandoned: bool,
    scratch: Option<Surface>,
}

impl TuningWorkaroundState {
    /// Comparisons that have failed since the last reset.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// The current offset from the closed-form htotal.
    pub fn delta(&self) -> i16 {
        self.delta
    }

    pub fn tuned(&self) -> bool {
        self.tuned
    }

    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn reference_crc(&self) -> Option<PixelCrc> {
        self.reference_crc
    }

    pub fn scratch(&self) -> Option<&Surface> {
        self.scratch.as_ref()
    }

    // Forgets all progress except abandonment, handing back the scratch
    // surface for the caller to free.
    fn clear(&mut self) -> Option<Surface> {
        self.iterations = 0;
        self.delta = 0;
        self.reference_crc = None;
        self.tuned = false;
        self.scratch.take()
    }
}

/// Returns `true` if calibration applies to a pipe driving `port` with
/// `timing` under `config`.
pub fn applies<M: Model>(config: &Config, port: PortType, timing: &TimingDescriptor) -> bool {
    config.htotal_tuning
        && M::needs_htotal_tuning(config.revision)
        && port == PortType::Sdvo
        && config.display_config.is_dual()
        && !timing.flags.legacy_vesa
}

fn offset_htotal(base: u16, delta: i16) -> u16 {
    (base as i32 + delta as i32).max(0).min(u16::MAX as i32) as u16
}

/// Returns the timing to actually program for `timing`, with htotal taken
/// from a finished calibration, or else from the closed-form starting point
/// plus the current calibration offset.
pub(crate) fn effective_timing<M: Model>(
    config: &Config,
    state: &TuningWorkaroundState,
    port: PortType,
    timing: &TimingDescriptor,
    clock: &ClockParameters,
) -> TimingDescriptor {
    if !applies::<M>(config, port, timing) {
        return *timing;
    }
    if timing.reserved.tuned {
        return timing.with_htotal(timing.reserved.htotal);
    }
    let base = timing::scaled_htotal(timing, clock);
    timing.with_htotal(offset_htotal(base, state.delta))
}

fn release<S: Surfaces>(surfaces: &mut S, scratch: Option<Surface>) -> Result<(), S::Error> {
    match scratch {
        Some(s) => surfaces.free(s),
        None => Ok(()),
    }
}

fn software_crc<S: Surfaces>(surfaces: &mut S, s: &Surface) -> Result<PixelCrc, S::Error> {
    let mut acc = Accumulator::new();
    let mut buf = [0u32; READBACK_CHUNK];
    let total = s.width * s.height;
    let mut offset = 0;
    while offset < total {
        let n = core::cmp::min(READBACK_CHUNK as u32, total - offset) as usize;
        surfaces.read_pixels(s, offset, &mut buf[..n])?;
        acc.feed_all(&buf[..n]);
        offset += n as u32;
    }
    Ok(acc.finish())
}

fn hardware_crc<M: Model, I: Interface, C: Clock>(
    ll: &mut LowLevel<M, I>,
    clock: &mut C,
    config: &Config,
    aperture: Aperture,
    pipe: Pipe,
) -> Result<PixelCrc, Error<I::Error>> {
    ll.wr(aperture, pipe, Register::CRC_CTRL, CRC_ARM)?;
    let r = poll(clock, WaitFor::CrcReady.timeout_us(), || {
        ll.bits_set(aperture, pipe, Register::CRC_CTRL, CRC_READY)
    });
    settle(config.timeout_policy, pipe, WaitFor::CrcReady, r)?;
    clock.delay_us(CRC_SETTLE_US);
    Ok(PixelCrc {
        red: ll.rd(aperture, pipe, Register::CRC_RED)? & CRC_MASK,
        green: ll.rd(aperture, pipe, Register::CRC_GREEN)? & CRC_MASK,
        blue: ll.rd(aperture, pipe, Register::CRC_BLUE)? & CRC_MASK,
    })
}

// Points the plane at the scratch surface, renders the test pattern into it
// and returns the hardware and software checksums, in that order. Leaves the
// plane retargeted and the CRC unit armed for `restore` to undo, even on
// error.
#[allow(clippy::too_many_arguments)]
fn compare<M, I, C, S>(
    ll: &mut LowLevel<M, I>,
    clock: &mut C,
    config: &Config,
    surfaces: &mut S,
    reference: &mut Option<PixelCrc>,
    scratch: &Surface,
    apertures: &[Aperture],
    port_aperture: Aperture,
    pipe: Pipe,
) -> Result<(PixelCrc, PixelCrc), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
    S: Surfaces<Error = I::Error>,
{
    plane::retarget(ll, apertures, pipe, scratch.offset, scratch.stride)?;

    let (width, height) = (scratch.width, scratch.height);
    let half = width / 2;
    surfaces.draw_rect(
        scratch,
        Rect {
            x: 0,
            y: 0,
            w: half,
            h: height,
        },
        PATTERN_LEFT,
    )?;
    surfaces.draw_rect(
        scratch,
        Rect {
            x: half,
            y: 0,
            w: width - half,
            h: height,
        },
        PATTERN_RIGHT,
    )?;
    {
        let r = poll(clock, WaitFor::RenderIdle.timeout_us(), || surfaces.is_idle());
        settle(config.timeout_policy, pipe, WaitFor::RenderIdle, r)?;
    }

    let hw = hardware_crc(ll, clock, config, port_aperture, pipe)?;
    let sw = match *reference {
        Some(crc) => crc,
        None => {
            let crc = software_crc(surfaces, scratch)?;
            *reference = Some(crc);
            crc
        }
    };
    Ok((hw, sw))
}

// Puts the plane back on the real framebuffer and stops the CRC unit.
fn restore<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    port_aperture: Aperture,
    pipe: Pipe,
    framebuffer: &Framebuffer,
) -> Result<(), I::Error> {
    let r = plane::retarget(ll, apertures, pipe, framebuffer.offset, framebuffer.stride);
    let disarmed = ll.wr(port_aperture, pipe, Register::CRC_CTRL, CRC_DISARM);
    r.and(disarmed)
}

/// Runs one calibration comparison on `pipe`, which must have its plane
/// running with `timing`.
///
/// On [`TuneOutcome::Continue`] the pipe has already been retimed with the
/// next htotal to try.
pub fn tune_step<M, I, C, S>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    timing: &mut TimingDescriptor,
    surfaces: &mut S,
) -> Result<TuneOutcome, Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
    S: Surfaces<Error = I::Error>,
{
    let Engine {
        ll,
        clock,
        config,
        pipes,
        ..
    } = engine;
    let ctx = &mut pipes[pipe.index()];
    let active = match (ctx.state, ctx.active) {
        (SequencerState::Disabled, _) | (SequencerState::PipeArmed, _) | (_, None) => {
            return Err(Error::InvalidSequence {
                pipe,
                state: ctx.state,
            })
        }
        (_, Some(active)) => active,
    };
    let st = &mut ctx.tuning;

    if !applies::<M>(config, active.port, timing) {
        if st.iterations > 0 || st.scratch.is_some() {
            log::warn!("pipe {:?}: htotal tuning bypassed, discarding progress", pipe);
        }
        release(surfaces, st.clear())?;
        return Ok(TuneOutcome::Bypassed);
    }
    if st.abandoned {
        return Ok(TuneOutcome::Abandoned);
    }
    if st.tuned || timing.reserved.tuned {
        return Ok(TuneOutcome::Converged);
    }

    let apertures = M::apertures(active.port);
    let port_aperture = M::port_aperture(active.port);
    let src = timing.source_size();
    let (width, height) = (src.width as u32, src.height as u32);

    let scratch = match st.scratch {
        Some(s) if s.width == width && s.height == height => s,
        old => {
            release(surfaces, old)?;
            st.scratch = None;
            st.reference_crc = None;
            let s = surfaces.alloc_scratch(Depth::Bpp32, width, height)?;
            st.scratch = Some(s);
            s
        }
    };

    let compared = compare(
        ll,
        clock,
        config,
        surfaces,
        &mut st.reference_crc,
        &scratch,
        apertures,
        port_aperture,
        pipe,
    );
    let restored = restore(ll, apertures, port_aperture, pipe, &active.framebuffer);
    let (hw, sw) = match compared {
        Ok(crcs) => {
            restored?;
            crcs
        }
        Err(err) => {
            // The comparison's error is the one reported. The scratch surface
            // goes too, so a later step starts from a fresh render.
            st.reference_crc = None;
            let _ = release(surfaces, st.scratch.take());
            return Err(err);
        }
    };

    if hw == sw {
        let base = timing::scaled_htotal(timing, &active.clock);
        let htotal = offset_htotal(base, st.delta);
        st.tuned = true;
        timing.reserved = TunedHtotal {
            htotal,
            delta: st.delta,
            tuned: true,
        };
        log::info!(
            "pipe {:?}: htotal tuned to {} (offset {}) after {} mismatches",
            pipe,
            htotal as u32 + 1,
            st.delta,
            st.iterations
        );
        release(surfaces, st.scratch.take())?;
        return Ok(TuneOutcome::Converged);
    }

    st.iterations += 1;
    log::debug!(
        "pipe {:?}: crc mismatch {} of {}: hw {:?} sw {:?}",
        pipe,
        st.iterations,
        LIMIT_TOTAL_CHECK_DISPLAY,
        hw,
        sw
    );
    let outcome = if st.iterations >= LIMIT_TOTAL_CHECK_DISPLAY {
        log::info!(
            "pipe {:?}: htotal tuning abandoned after {} attempts",
            pipe,
            st.iterations
        );
        release(surfaces, st.clear())?;
        st.abandoned = true;
        TuneOutcome::Abandoned
    } else {
        st.delta += HTOTAL_TUNING_STEP;
        TuneOutcome::Continue
    };

    let t = effective_timing::<M>(config, st, active.port, timing, &active.clock);
    timing::program_timing(ll, apertures, pipe, &t, &active.clock)?;
    Ok(outcome)
}

// Drops progress made against whatever mode the pipe had before, keeping
// abandonment.
pub(crate) fn discard_progress<S: Surfaces>(
    state: &mut TuningWorkaroundState,
    surfaces: &mut S,
) -> Result<(), S::Error> {
    release(surfaces, state.clear())
}

/// Forgets any calibration progress on `pipe` and lifts abandonment.
pub fn reset_tuning<M, I, C, S>(
    engine: &mut Engine<M, I, C>,
    pipe: Pipe,
    surfaces: &mut S,
) -> Result<(), Error<I::Error>>
where
    M: Model,
    I: Interface,
    C: Clock,
    S: Surfaces<Error = I::Error>,
{
    let st = &mut engine.pipes[pipe.index()].tuning;
    let scratch = st.clear();
    st.abandoned = false;
    release(surfaces, scratch)?;
    Ok(())
}
