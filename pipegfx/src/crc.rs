//! The pixel checksum computed by the display engine's CRC unit.
//!
//! The hardware keeps one 23-bit CRC per color channel over the pixels a
//! pipe scans out, with generator polynomial x^23 + x^5 + 1, feeding each
//! channel's 8 bits most significant first. This module computes the same
//! values in software, which is what lets the htotal calibration tell
//! whether the hardware saw the image it was given.

/// Mask of the bits a CRC value occupies.
pub const CRC_MASK: u32 = 0x7f_ffff;

/// The generator polynomial without its x^23 term.
pub const CRC_POLY: u32 = 0x21;

/// Per-channel checksums for an image.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PixelCrc {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl PixelCrc {
    pub const fn as_array(&self) -> [u32; 3] {
        [self.red, self.green, self.blue]
    }
}

/// Advances a channel CRC by one 8-bit sample.
///
/// This is eight steps of the serial shift register at once. The taps are
/// close enough to the bottom of the register that no feedback bit from
/// within the byte reaches the top before the byte is consumed, so every
/// feedback bit is just a register bit XOR a data bit.
pub const fn update(crc: u32, bits: u8) -> u32 {
    let x = ((crc >> 15) & 0xff) ^ bits as u32;
    ((crc << 8) & CRC_MASK) ^ x ^ (x << 5)
}

/// Accumulates [`PixelCrc`] over xRGB 8:8:8:8 pixels in raster order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Accumulator {
    crc: PixelCrc,
}

impl Accumulator {
    pub const fn new() -> Self {
        Self {
            crc: PixelCrc {
                red: 0,
                green: 0,
                blue: 0,
            },
        }
    }

    pub fn feed(&mut self, pixel: u32) {
        self.crc.red = update(self.crc.red, (pixel >> 16) as u8);
        self.crc.green = update(self.crc.green, (pixel >> 8) as u8);
        self.crc.blue = update(self.crc.blue, pixel as u8);
    }

    pub fn feed_all(&mut self, pixels: &[u32]) {
        for p in pixels {
            self.feed(*p);
        }
    }

    pub const fn finish(&self) -> PixelCrc {
        self.crc
    }
}

/// Computes the checksums of a sequence of pixels.
pub fn checksum<It: IntoIterator<Item = u32>>(pixels: It) -> PixelCrc {
    let mut acc = Accumulator::new();
    for p in pixels {
        acc.feed(p);
    }
    acc.finish()
}
