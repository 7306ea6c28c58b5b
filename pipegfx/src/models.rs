pub mod plb;
pub mod tnc;

use crate::clocks::{ClockLimits, ClockParameters, Divisors, DpllRegisters};
use crate::interface::Aperture;
use crate::plane::Depth;
use crate::registers::Register;
use crate::{Pipe, PortType};

/// Implemented by types that represent the characteristics of different
/// specific families of display engine.
///
/// A model is the hardware profile of a family: the bit encodings, divider
/// tables, register windows and silicon errata that differ between
/// families. Every part of this crate that touches hardware is generic over
/// a model, so selecting one when constructing an
/// [`Engine`](crate::Engine) configures all of them at once.
///
/// This type is typically implemented on empty types to represent that
/// models are a compile-time-only construct used to represent the
/// differences between families through monomorphization, and they have no
/// presence at runtime. Differences between steppings of the same family
/// are handled dynamically, based on the revision given in
/// [`Config`](crate::config::Config).
pub trait Model: Sized {
    const NAME: &'static str;

    /// `PIPECONF` bit requesting that the pipe run.
    const PIPE_ENABLE: u32 = 1 << 31;

    /// `PIPECONF` bit reporting that the pipe is actually running.
    const PIPE_STATE: u32;

    /// `PIPECONF` bits selecting interlaced scan-out.
    const PIPE_INTERLACE: u32;

    /// Constant display FIFO watermark settings, written whenever a plane is
    /// programmed.
    const FIFO_WATERMARKS: [(Register, u32); 4];

    /// The reference clock feeding the DPLL when driving the given port.
    fn ref_freq_khz(port: PortType) -> u32;

    /// Divider search space for the given port.
    fn clock_limits(port: PortType) -> &'static ClockLimits;

    /// The documented substitute clock for the given port, used only when
    /// the [`ClockFailurePolicy`](crate::config::ClockFailurePolicy) allows
    /// it, and always for legacy VGA modes.
    fn fallback_clock(port: PortType) -> ClockParameters;

    /// Translates divisors into the family's DPLL and FP register encoding,
    /// or returns `None` if they're outside what the port's PLL can be set
    /// to. The result does not include the VCO enable bit.
    fn encode_dpll(port: PortType, params: &ClockParameters) -> Option<DpllRegisters>;

    /// Recovers divisors from register values previously produced by
    /// `encode_dpll`, or returns `None` if the values aren't a valid
    /// encoding.
    fn decode_dpll(port: PortType, regs: DpllRegisters) -> Option<Divisors>;

    /// Plane control bits selecting the given pixel depth.
    fn plane_depth_bits(depth: Depth) -> u32;

    /// The register windows through which a pipe driving the given port must
    /// be programmed.
    fn apertures(port: PortType) -> &'static [Aperture];

    /// The register window carrying the port itself, its DPLL and its CRC
    /// engine.
    fn port_aperture(port: PortType) -> Aperture {
        let apertures = Self::apertures(port);
        apertures[apertures.len() - 1]
    }

    /// Returns `true` if the family can route the given pipe to the given
    /// port.
    fn supports(pipe: Pipe, port: PortType) -> bool;

    /// Returns `true` if the given revision needs both windows' pipes
    /// stopped and the clipping chicken bits pulsed before a pipe driving
    /// `port` is enabled.
    fn needs_clip_fix(_revision: u8, _port: PortType) -> bool {
        false
    }

    /// Returns `true` if the given revision needs the secondary window's
    /// instance of a pipe forced off before that pipe is disabled.
    fn needs_other_pipe_disable(_revision: u8) -> bool {
        false
    }

    /// Returns `true` if the given revision suffers the horizontal clipping
    /// defect that the htotal auto-tuning loop corrects.
    fn needs_htotal_tuning(_revision: u8) -> bool {
        false
    }
}
