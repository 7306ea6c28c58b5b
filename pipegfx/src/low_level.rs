use crate::interface::{Aperture, Interface};
use crate::models::Model;
use crate::registers::Register;
use crate::Pipe;

/// `LowLevel` is a low-level interface to the display engine which matches
/// the primitive register operations used in the programmer's reference
/// manuals for these parts.
///
/// This is slightly higher-level than the `Interface` trait, knowing how to
/// find the instance of a per-pipe register and how to repeat a write
/// through every register window a pipe spans, but doesn't have any special
/// knowledge about programming sequences.
pub struct LowLevel<M: Model, I: Interface> {
    raw: I,
    _model: core::marker::PhantomData<M>,
}

impl<M: Model, I: Interface> LowLevel<M, I> {
    pub fn new(interface: I) -> Self {
        Self {
            raw: interface,
            _model: core::marker::PhantomData,
        }
    }

    pub fn borrow_interface(&mut self) -> &mut I {
        &mut self.raw
    }

    pub fn into_interface(self) -> I {
        self.raw
    }

    pub fn rd32(&mut self, aperture: Aperture, offset: u32) -> Result<u32, I::Error> {
        self.raw.read32(aperture, offset)
    }

    pub fn wr32(&mut self, aperture: Aperture, offset: u32, v: u32) -> Result<(), I::Error> {
        log::trace!("{:?} {:#07x} <- {:#010x}", aperture, offset, v);
        self.raw.write32(aperture, offset, v)
    }

    /// Reads the given pipe's instance of a register.
    pub fn rd(&mut self, aperture: Aperture, pipe: Pipe, reg: Register) -> Result<u32, I::Error> {
        self.rd32(aperture, reg.offset_for(pipe))
    }

    /// Writes the given pipe's instance of a register.
    pub fn wr(
        &mut self,
        aperture: Aperture,
        pipe: Pipe,
        reg: Register,
        v: u32,
    ) -> Result<(), I::Error> {
        self.wr32(aperture, reg.offset_for(pipe), v)
    }

    /// Writes the same value to the given pipe's instance of a register in
    /// each of the given register windows, in order.
    pub fn wr_all(
        &mut self,
        apertures: &[Aperture],
        pipe: Pipe,
        reg: Register,
        v: u32,
    ) -> Result<(), I::Error> {
        for aperture in apertures {
            self.wr(*aperture, pipe, reg, v)?;
        }
        Ok(())
    }

    /// Read-modify-write of the given pipe's instance of a register, clearing
    /// the bits in `clear` and then setting the bits in `set`. Returns the
    /// value written.
    pub fn modify(
        &mut self,
        aperture: Aperture,
        pipe: Pipe,
        reg: Register,
        clear: u32,
        set: u32,
    ) -> Result<u32, I::Error> {
        let v = (self.rd(aperture, pipe, reg)? & !clear) | set;
        self.wr(aperture, pipe, reg, v)?;
        Ok(v)
    }

    /// Returns `true` if all of the given bits are set in the given pipe's
    /// instance of a register.
    pub fn bits_set(
        &mut self,
        aperture: Aperture,
        pipe: Pipe,
        reg: Register,
        bits: u32,
    ) -> Result<bool, I::Error> {
        Ok(self.rd(aperture, pipe, reg)? & bits == bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::testing::{MockInterface, MockInterfaceCall};
    use crate::models::tnc::TNC;

    #[test]
    fn test_wr_all() {
        let mut ll: LowLevel<TNC, _> = LowLevel::new(MockInterface::new());
        ll.wr_all(
            &[Aperture::Primary, Aperture::Secondary],
            Pipe::B,
            Register::HTOTAL,
            0x0383_027f,
        )
        .unwrap();
        assert_eq!(
            ll.into_interface().calls(),
            vec![
                MockInterfaceCall::Write(Aperture::Primary, 0x61000, 0x0383_027f),
                MockInterfaceCall::Write(Aperture::Secondary, 0x61000, 0x0383_027f),
            ]
        );
    }

    #[test]
    fn test_modify() {
        let mut mock = MockInterface::new();
        mock.setup_reg(Aperture::Primary, 0x70008, 0x0000_00f0);
        let mut ll: LowLevel<TNC, _> = LowLevel::new(mock);
        let v = ll
            .modify(Aperture::Primary, Pipe::A, Register::PIPECONF, 0x30, 1 << 31)
            .unwrap();
        assert_eq!(v, 0x8000_00c0);
        assert!(ll
            .bits_set(Aperture::Primary, Pipe::A, Register::PIPECONF, 1 << 31)
            .unwrap());
    }
}
