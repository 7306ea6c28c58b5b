//! The register access facade between this crate and the display hardware.

#[cfg(any(test, feature = "fake"))]
pub mod fake;

/// Implementations of `Interface` serve as adapters between the register
/// access this library expects and a specific physical implementation of
/// that access, such as a pair of memory-mapped PCI BARs.
///
/// The main library contains no hardware implementations of this trait, in
/// order to make the library portable across systems big and small. The
/// `pipegfx-mmio` crate binds it to memory-mapped register windows.
pub trait Interface {
    type Error;

    fn read32(&mut self, aperture: Aperture, offset: u32) -> Result<u32, Self::Error>;
    fn write32(&mut self, aperture: Aperture, offset: u32, v: u32) -> Result<(), Self::Error>;
}

impl<'a, I: Interface> Interface for &'a mut I {
    type Error = I::Error;

    fn read32(&mut self, aperture: Aperture, offset: u32) -> Result<u32, Self::Error> {
        (**self).read32(aperture, offset)
    }

    fn write32(&mut self, aperture: Aperture, offset: u32, v: u32) -> Result<(), Self::Error> {
        (**self).write32(aperture, offset, v)
    }
}

/// Selects one of the register windows through which the display engine
/// is visible.
///
/// Some parts in this family expose a single logical pipe through two PCI
/// functions, each with its own register window. Timing registers for such
/// a pipe must be written through both windows to take effect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Aperture {
    /// The register window of PCI function 0, which carries the pipes,
    /// planes, DPLLs and the LVDS port.
    Primary,

    /// The register window of the companion PCI function, which carries the
    /// SDVO port and its mirror of the pipe timing registers.
    Secondary,
}

impl Aperture {
    /// Returns the aperture that isn't this one.
    pub const fn other(self) -> Self {
        match self {
            Aperture::Primary => Aperture::Secondary,
            Aperture::Secondary => Aperture::Primary,
        }
    }
}
