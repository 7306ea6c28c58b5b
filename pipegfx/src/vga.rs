//! Legacy VGA modes and the VGA plane.
//!
//! Timings flagged as legacy VGA/VESA modes don't go through the normal
//! timing program. They are looked up by mode number in a small fixed table
//! of VGA-compatible register values and always run from the model's
//! fallback clock, the closest the PLL gets to 25.175 MHz.

use crate::interface::{Aperture, Interface};
use crate::low_level::LowLevel;
use crate::models::Model;
use crate::registers::Register;
use crate::timing::{SourceSize, TimingDescriptor, TimingDimension};
use crate::Pipe;

/// `VGACNTRL` bit turning the VGA plane off. The plane is on when clear.
pub const VGA_DISABLE: u32 = 1 << 31;

/// `VGACNTRL` bit routing the VGA plane to pipe B.
pub const VGA_PIPE_B_SELECT: u32 = 1 << 29;

/// Time for the VGA plane to drain after being turned off.
pub(crate) const VGA_DISABLE_DELAY_US: u32 = 300;

/// Register values for one legacy mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VgaMode {
    pub number: u16,
    pub h: TimingDimension,
    pub v: TimingDimension,
    /// The size of the image the VGA plane produces, which the pipe
    /// centers within its active area.
    pub source: SourceSize,
}

impl VgaMode {
    /// The register values for this mode, in the order they are written.
    pub fn registers(&self) -> [(Register, u32); 7] {
        let mut t = TimingDescriptor::new(0, 0, self.h, self.v);
        t.linked = Some(self.source);
        t.registers()
    }
}

/// The legacy modes this crate knows how to program.
pub static VGA_MODES: [VgaMode; 3] = [
    // 80x25 text, 9-dot characters.
    VgaMode {
        number: 0x03,
        h: TimingDimension::calculate(720, 18, 108, 54),
        v: TimingDimension::calculate(400, 12, 2, 35),
        source: SourceSize {
            width: 720,
            height: 400,
        },
    },
    // 640x480 16-color planar.
    VgaMode {
        number: 0x12,
        h: TimingDimension::calculate(640, 16, 96, 48),
        v: TimingDimension::calculate(480, 10, 2, 33),
        source: SourceSize {
            width: 640,
            height: 480,
        },
    },
    // 320x200 256-color, doubled in both directions.
    VgaMode {
        number: 0x13,
        h: TimingDimension::calculate(640, 16, 96, 48),
        v: TimingDimension::calculate(400, 12, 2, 35),
        source: SourceSize {
            width: 320,
            height: 200,
        },
    },
];

/// Finds the given mode number in [`VGA_MODES`].
pub fn lookup(number: u16) -> Option<&'static VgaMode> {
    VGA_MODES.iter().find(|m| m.number == number)
}

pub(crate) fn program<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    pipe: Pipe,
    mode: &VgaMode,
) -> Result<(), I::Error> {
    log::debug!("pipe {:?}: VGA mode {:#04x}", pipe, mode.number);
    for (reg, v) in mode.registers().iter() {
        ll.wr_all(apertures, pipe, *reg, *v)?;
    }
    Ok(())
}

/// Returns `true` if the VGA plane is scanning out.
pub(crate) fn is_active<M: Model, I: Interface>(ll: &mut LowLevel<M, I>) -> Result<bool, I::Error> {
    let v = ll.rd32(Aperture::Primary, Register::VGACNTRL.offset())?;
    Ok(v & VGA_DISABLE == 0)
}

/// Returns the pipe the VGA plane is routed to, if it's on.
pub(crate) fn active_pipe<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
) -> Result<Option<Pipe>, I::Error> {
    let v = ll.rd32(Aperture::Primary, Register::VGACNTRL.offset())?;
    if v & VGA_DISABLE != 0 {
        return Ok(None);
    }
    if v & VGA_PIPE_B_SELECT != 0 {
        Ok(Some(Pipe::B))
    } else {
        Ok(Some(Pipe::A))
    }
}

pub(crate) fn enable_plane<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    pipe: Pipe,
) -> Result<(), I::Error> {
    let v = match pipe {
        Pipe::A => 0,
        Pipe::B => VGA_PIPE_B_SELECT,
    };
    ll.wr32(Aperture::Primary, Register::VGACNTRL.offset(), v)
}

pub(crate) fn disable_plane<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
) -> Result<(), I::Error> {
    ll.wr32(Aperture::Primary, Register::VGACNTRL.offset(), VGA_DISABLE)
}
