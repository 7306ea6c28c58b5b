//! The primary display plane, which scans a framebuffer out onto a pipe.

use crate::interface::{Aperture, Interface};
use crate::low_level::LowLevel;
use crate::models::Model;
use crate::registers::Register;
use crate::Pipe;

/// `DSPCNTR` bit enabling the plane.
pub const PLANE_ENABLE: u32 = 1 << 31;

/// `DSPCNTR` bit selecting X-tiled memory layout.
pub const PLANE_TILED: u32 = 1 << 10;

/// Pixel formats a plane can scan out.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Depth {
    /// 8-bit indexed through the palette.
    Bpp8,
    /// RGB 5:6:5.
    Bpp16,
    /// xRGB 8:8:8:8.
    Bpp32,
}

impl Depth {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Depth::Bpp8 => 1,
            Depth::Bpp16 => 2,
            Depth::Bpp32 => 4,
        }
    }
}

/// Describes the memory a plane scans out of.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Framebuffer {
    /// Offset of the first pixel within graphics memory.
    pub offset: u32,
    /// Distance between the starts of consecutive lines, in bytes.
    pub stride: u32,
    pub depth: Depth,
    pub tiled: bool,
}

impl Framebuffer {
    pub const fn new(offset: u32, stride: u32, depth: Depth) -> Self {
        Self {
            offset,
            stride,
            depth,
            tiled: false,
        }
    }

    pub(crate) fn control_bits<M: Model>(&self) -> u32 {
        let mut v = M::plane_depth_bits(self.depth);
        if self.tiled {
            v |= PLANE_TILED;
        }
        v
    }
}

/// Writes everything about the plane except its enable bit, leaving the
/// plane off.
pub(crate) fn program<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    pipe: Pipe,
    fb: &Framebuffer,
) -> Result<(), I::Error> {
    for (reg, v) in M::FIFO_WATERMARKS.iter() {
        ll.wr_all(apertures, pipe, *reg, *v)?;
    }
    ll.wr_all(apertures, pipe, Register::DSPSTRIDE, fb.stride)?;
    ll.wr_all(apertures, pipe, Register::DSPLINOFF, 0)?;
    ll.wr_all(apertures, pipe, Register::DSPTILEOFF, 0)?;
    ll.wr_all(apertures, pipe, Register::DSPCNTR, fb.control_bits::<M>())?;
    // The surface address write is what latches the other plane registers.
    ll.wr_all(apertures, pipe, Register::DSPSURF, fb.offset)
}

pub(crate) fn enable<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    pipe: Pipe,
    fb: &Framebuffer,
) -> Result<(), I::Error> {
    ll.wr_all(
        apertures,
        pipe,
        Register::DSPCNTR,
        fb.control_bits::<M>() | PLANE_ENABLE,
    )?;
    ll.wr_all(apertures, pipe, Register::DSPSURF, fb.offset)
}

pub(crate) fn disable<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    pipe: Pipe,
    fb: &Framebuffer,
) -> Result<(), I::Error> {
    ll.wr_all(apertures, pipe, Register::DSPCNTR, fb.control_bits::<M>())?;
    ll.wr_all(apertures, pipe, Register::DSPSURF, fb.offset)
}

/// Points an enabled plane at different memory without otherwise
/// disturbing it.
pub(crate) fn retarget<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    pipe: Pipe,
    offset: u32,
    stride: u32,
) -> Result<(), I::Error> {
    ll.wr_all(apertures, pipe, Register::DSPSTRIDE, stride)?;
    ll.wr_all(apertures, pipe, Register::DSPSURF, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::testing::{MockInterface, MockInterfaceCall};
    use crate::models::plb::PLB;
    use crate::models::tnc::TNC;

    #[test]
    fn test_program_leaves_plane_off() {
        let mut ll: LowLevel<PLB, _> = LowLevel::new(MockInterface::new());
        let fb = Framebuffer {
            offset: 0x0010_0000,
            stride: 2560,
            depth: Depth::Bpp32,
            tiled: true,
        };
        program(&mut ll, &[Aperture::Primary], Pipe::B, &fb).unwrap();
        let calls = ll.into_interface().calls();
        assert_eq!(calls.len(), 9);
        assert_eq!(
            calls[7],
            MockInterfaceCall::Write(Aperture::Primary, 0x71180, (0b0110 << 26) | PLANE_TILED)
        );
        assert_eq!(
            calls[8],
            MockInterfaceCall::Write(Aperture::Primary, 0x7119c, 0x0010_0000)
        );
    }

    #[test]
    fn test_enable_both_apertures() {
        let mut ll: LowLevel<TNC, _> = LowLevel::new(MockInterface::new());
        let fb = Framebuffer::new(0, 1600, Depth::Bpp16);
        enable(
            &mut ll,
            &[Aperture::Primary, Aperture::Secondary],
            Pipe::B,
            &fb,
        )
        .unwrap();
        let want = PLANE_ENABLE | (0b0101 << 26);
        assert_eq!(
            ll.into_interface().calls(),
            vec![
                MockInterfaceCall::Write(Aperture::Primary, 0x71180, want),
                MockInterfaceCall::Write(Aperture::Secondary, 0x71180, want),
                MockInterfaceCall::Write(Aperture::Primary, 0x7119c, 0),
                MockInterfaceCall::Write(Aperture::Secondary, 0x7119c, 0),
            ]
        );
    }
}
