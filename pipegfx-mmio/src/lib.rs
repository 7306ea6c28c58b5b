#![no_std]

use core::ptr;
use embedded_hal::blocking::delay::DelayUs;
use pipegfx::interface::{Aperture, Interface};
use pipegfx::platform::Clock;

/// `MmioInterface` is an implementation of `pipegfx::Interface` that
/// accesses the display engine through memory-mapped register windows, such
/// as the PCI BARs of the display functions mapped into the caller's address
/// space.
pub struct MmioInterface {
    primary: Window,
    secondary: Option<Window>,
}

#[derive(Clone, Copy)]
struct Window {
    base: *mut u32,
    len: usize,
}

impl Window {
    fn reg(&self, aperture: Aperture, offset: u32) -> Result<*mut u32, MmioError> {
        if offset % 4 != 0 {
            return Err(MmioError::Misaligned { aperture, offset });
        }
        let end = offset as usize + 4;
        if end > self.len {
            return Err(MmioError::OutOfBounds { aperture, offset });
        }
        // In bounds, so the add can't leave the mapping.
        Ok(unsafe { self.base.add(offset as usize / 4) })
    }
}

impl MmioInterface {
    /// Creates an interface over the given register windows. `secondary`
    /// is needed only on parts whose display engine spans two PCI
    /// functions.
    ///
    /// # Safety
    ///
    /// Each base pointer must be aligned to four bytes and must stay valid
    /// for volatile reads and writes over its whole length for as long as
    /// the interface exists. Nothing else may access the registers while the
    /// interface exists.
    pub unsafe fn new(primary: (*mut u8, usize), secondary: Option<(*mut u8, usize)>) -> Self {
        Self {
            primary: Window {
                base: primary.0 as *mut u32,
                len: primary.1,
            },
            secondary: secondary.map(|(base, len)| Window {
                base: base as *mut u32,
                len,
            }),
        }
    }

    fn reg(&self, aperture: Aperture, offset: u32) -> Result<*mut u32, MmioError> {
        let window = match aperture {
            Aperture::Primary => self.primary,
            Aperture::Secondary => self.secondary.ok_or(MmioError::NoSecondary)?,
        };
        window.reg(aperture, offset)
    }
}

impl Interface for MmioInterface {
    type Error = MmioError;

    fn read32(&mut self, aperture: Aperture, offset: u32) -> Result<u32, Self::Error> {
        let p = self.reg(aperture, offset)?;
        Ok(unsafe { ptr::read_volatile(p) })
    }

    fn write32(&mut self, aperture: Aperture, offset: u32, v: u32) -> Result<(), Self::Error> {
        let p = self.reg(aperture, offset)?;
        unsafe { ptr::write_volatile(p, v) };
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MmioError {
    /// The register isn't inside the window.
    OutOfBounds { aperture: Aperture, offset: u32 },
    /// Registers are 32 bits wide and must be accessed at multiples of four.
    Misaligned { aperture: Aperture, offset: u32 },
    /// The secondary window was addressed but none was mapped.
    NoSecondary,
}

impl core::fmt::Display for MmioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MmioError::OutOfBounds { aperture, offset } => {
                write!(f, "offset {:#x} is outside the {:?} window", offset, aperture)
            }
            MmioError::Misaligned { aperture, offset } => {
                write!(f, "offset {:#x} in the {:?} window is misaligned", offset, aperture)
            }
            MmioError::NoSecondary => write!(f, "no secondary register window is mapped"),
        }
    }
}

/// Adapts any `embedded-hal` microsecond delay into a `pipegfx` clock, for
/// platforms without a readable timer.
///
/// Time is measured by adding up the delays requested, so it runs slow by
/// however long the work between delays takes. That only lengthens the
/// engine's timeouts.
pub struct CountingClock<D: DelayUs<u32>> {
    delay: D,
    elapsed_us: u64,
}

impl<D: DelayUs<u32>> CountingClock<D> {
    pub fn new(delay: D) -> Self {
        Self {
            delay,
            elapsed_us: 0,
        }
    }

    pub fn into_inner(self) -> D {
        self.delay
    }
}

impl<D: DelayUs<u32>> DelayUs<u32> for CountingClock<D> {
    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
        self.elapsed_us += us as u64;
    }
}

impl<D: DelayUs<u32>> Clock for CountingClock<D> {
    fn now_us(&mut self) -> u64 {
        self.elapsed_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatile_access() {
        let mut primary = [0u32; 16];
        let mut secondary = [0u32; 4];
        let mut ei = unsafe {
            MmioInterface::new(
                (primary.as_mut_ptr() as *mut u8, 64),
                Some((secondary.as_mut_ptr() as *mut u8, 16)),
            )
        };
        ei.write32(Aperture::Primary, 0x3c, 0xdead_beef).unwrap();
        ei.write32(Aperture::Secondary, 0x4, 7).unwrap();
        assert_eq!(ei.read32(Aperture::Primary, 0x3c).unwrap(), 0xdead_beef);
        assert_eq!(ei.read32(Aperture::Secondary, 0x4).unwrap(), 7);
        assert_eq!(ei.read32(Aperture::Primary, 0x4).unwrap(), 0);
        drop(ei);
        assert_eq!(primary[15], 0xdead_beef);
        assert_eq!(secondary[1], 7);
    }

    #[test]
    fn test_rejects_bad_offsets() {
        let mut primary = [0u32; 4];
        let mut ei = unsafe { MmioInterface::new((primary.as_mut_ptr() as *mut u8, 16), None) };
        assert_eq!(
            ei.read32(Aperture::Primary, 0x10),
            Err(MmioError::OutOfBounds {
                aperture: Aperture::Primary,
                offset: 0x10
            })
        );
        assert_eq!(
            ei.write32(Aperture::Primary, 0x2, 0),
            Err(MmioError::Misaligned {
                aperture: Aperture::Primary,
                offset: 0x2
            })
        );
        assert_eq!(
            ei.read32(Aperture::Secondary, 0),
            Err(MmioError::NoSecondary)
        );
    }

    struct NoDelay;

    impl DelayUs<u32> for NoDelay {
        fn delay_us(&mut self, _us: u32) {}
    }

    #[test]
    fn test_counting_clock() {
        let mut clock = CountingClock::new(NoDelay);
        assert_eq!(clock.now_us(), 0);
        clock.delay_us(100);
        clock.delay_us(50);
        assert_eq!(clock.now_us(), 150);
    }
}
