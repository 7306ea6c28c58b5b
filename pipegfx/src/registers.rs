use crate::Pipe;
use core::convert::TryFrom;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Represents a register in the display engine's MMIO space.
///
/// Registers that exist once per pipe are named here by their pipe A
/// offset. Use [`Register::offset_for`] to find the instance belonging to
/// another pipe.
#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum Register {
    DPLL = 0x6014,
    FP0 = 0x6040,
    HTOTAL = 0x60000,
    HBLANK = 0x60004,
    HSYNC = 0x60008,
    VTOTAL = 0x6000c,
    VBLANK = 0x60010,
    VSYNC = 0x60014,
    PIPESRC = 0x6001c,
    CRC_CTRL = 0x60050,
    CRC_RED = 0x60060,
    CRC_GREEN = 0x60064,
    CRC_BLUE = 0x60068,
    SDVO_CTRL = 0x61140,
    LVDS = 0x61180,
    PIPECONF = 0x70008,
    PIPESTAT = 0x70024,
    DSPARB = 0x70030,
    DSPFW1 = 0x70034,
    DSPFW2 = 0x70038,
    DSPFW3 = 0x7003c,
    DSPCNTR = 0x70180,
    DSPLINOFF = 0x70184,
    DSPSTRIDE = 0x70188,
    DSPSURF = 0x7019c,
    DSPTILEOFF = 0x701a4,
    DSPCHICKEN = 0x70400,
    VGACNTRL = 0x71400,
    PALETTE = 0x0a000,
}

impl Register {
    /// Returns the offset of the register within the aperture, for
    /// registers that exist only once.
    pub fn offset(self) -> u32 {
        self.into()
    }

    /// Returns the distance between the pipe A and pipe B instances of this
    /// register, or `None` if the register exists only once.
    pub const fn pipe_stride(self) -> Option<u32> {
        use Register::*;
        match self {
            DPLL => Some(0x4),
            FP0 => Some(0x8),
            PALETTE => Some(0x800),
            HTOTAL | HBLANK | HSYNC | VTOTAL | VBLANK | VSYNC | PIPESRC | CRC_CTRL | CRC_RED
            | CRC_GREEN | CRC_BLUE | PIPECONF | PIPESTAT | DSPCNTR | DSPLINOFF | DSPSTRIDE
            | DSPSURF | DSPTILEOFF => Some(0x1000),
            SDVO_CTRL | LVDS | DSPARB | DSPFW1 | DSPFW2 | DSPFW3 | DSPCHICKEN | VGACNTRL => None,
        }
    }

    /// Returns the offset of the instance of this register that belongs to
    /// the given pipe. For registers that exist only once, the pipe is
    /// ignored.
    pub fn offset_for(self, pipe: Pipe) -> u32 {
        match self.pipe_stride() {
            Some(stride) => self.offset() + stride * pipe.index() as u32,
            None => self.offset(),
        }
    }

    /// Finds the register, and the pipe it belongs to if it's a per-pipe
    /// register, at the given offset.
    ///
    /// Palette entries other than the first one of each pipe aren't
    /// recognized.
    pub fn decode(offset: u32) -> Option<(Register, Option<Pipe>)> {
        if let Ok(reg) = Register::try_from(offset) {
            let pipe = reg.pipe_stride().map(|_| Pipe::A);
            return Some((reg, pipe));
        }
        for stride in [0x1000, 0x800, 0x8, 0x4].iter() {
            if let Some(base) = offset.checked_sub(*stride) {
                if let Ok(reg) = Register::try_from(base) {
                    if reg.pipe_stride() == Some(*stride) {
                        return Some((reg, Some(Pipe::B)));
                    }
                }
            }
        }
        None
    }
}
