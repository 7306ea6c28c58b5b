//! Traits for the collaborators the engine borrows from its host: a clock to
//! wait against, an allocator and renderer for scratch surfaces, and the
//! external drivers for output ports.
//!
//! As with [`Interface`](crate::interface::Interface), this crate contains
//! no implementations of these traits except the simulated ones in
//! [`fake`](crate::interface::fake).

use crate::plane::Depth;
use crate::timing::TimingDescriptor;
use crate::PowerState;
use embedded_hal::blocking::delay::DelayUs;

/// A source of elapsed time, and of voluntary delays between polls.
///
/// The delay half is the `embedded-hal` delay trait, so any HAL delay
/// provider can serve as long as the platform can also report a
/// monotonic microsecond count.
pub trait Clock: DelayUs<u32> {
    /// Microseconds since an arbitrary fixed point. Must never go backwards.
    fn now_us(&mut self) -> u64;
}

impl<'a, C: Clock> DelayUs<u32> for &'a mut C {
    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

impl<'a, C: Clock> Clock for &'a mut C {
    fn now_us(&mut self) -> u64 {
        (**self).now_us()
    }
}

/// A rectangle within a surface, in pixels.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// A surface allocated from graphics memory by [`Surfaces::alloc_scratch`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Surface {
    /// Allocator-specific identity of the surface.
    pub handle: u32,
    /// Offset of the first pixel within graphics memory, as a plane
    /// register expects it.
    pub offset: u32,
    /// Line pitch in bytes.
    pub stride: u32,
    pub width: u32,
    pub height: u32,
    pub format: Depth,
}

/// Allocation and simple rendering into graphics memory.
///
/// Only the htotal auto-tuning calibration uses this, to render its test
/// pattern.
pub trait Surfaces {
    type Error;

    fn alloc_scratch(
        &mut self,
        format: Depth,
        width: u32,
        height: u32,
    ) -> Result<Surface, Self::Error>;

    fn free(&mut self, surface: Surface) -> Result<(), Self::Error>;

    /// Queues a solid fill of the given rectangle. `color` is xRGB 8:8:8:8.
    fn draw_rect(&mut self, surface: &Surface, rect: Rect, color: u32) -> Result<(), Self::Error>;

    /// Returns `true` once all queued rendering has landed in memory.
    fn is_idle(&mut self) -> Result<bool, Self::Error>;

    /// Copies 32bpp pixels out of the surface, starting `offset` pixels into
    /// it in raster order, ignoring any padding at the end of each line.
    fn read_pixels(
        &mut self,
        surface: &Surface,
        offset: u32,
        into: &mut [u32],
    ) -> Result<(), Self::Error>;
}

impl<'a, S: Surfaces> Surfaces for &'a mut S {
    type Error = S::Error;

    fn alloc_scratch(
        &mut self,
        format: Depth,
        width: u32,
        height: u32,
    ) -> Result<Surface, Self::Error> {
        (**self).alloc_scratch(format, width, height)
    }

    fn free(&mut self, surface: Surface) -> Result<(), Self::Error> {
        (**self).free(surface)
    }

    fn draw_rect(&mut self, surface: &Surface, rect: Rect, color: u32) -> Result<(), Self::Error> {
        (**self).draw_rect(surface, rect, color)
    }

    fn is_idle(&mut self) -> Result<bool, Self::Error> {
        (**self).is_idle()
    }

    fn read_pixels(
        &mut self,
        surface: &Surface,
        offset: u32,
        into: &mut [u32],
    ) -> Result<(), Self::Error> {
        (**self).read_pixels(surface, offset, into)
    }
}

/// The external driver behind an output port, such as an LVDS panel's
/// power sequencer or an SDVO encoder on the I2C bus.
pub trait PortDriver {
    type Error;

    /// Tells the driver which timing the given pipes (a bitmask of
    /// [`Pipe::mask`](crate::Pipe::mask) values) are about to carry.
    fn set_mode(&mut self, timing: &TimingDescriptor, pipe_mask: u32) -> Result<(), Self::Error>;

    fn set_power(&mut self, state: PowerState) -> Result<(), Self::Error>;

    /// Returns `true` if the port has a discrete bridge chip that needs its
    /// own bring-up once the port is carrying a signal.
    fn has_bridge(&self) -> bool {
        false
    }

    fn bring_up_bridge(&mut self, _timing: &TimingDescriptor) -> Result<(), Self::Error> {
        Ok(())
    }
}
