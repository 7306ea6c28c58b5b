//! Display timing descriptors and the registers they program.

use crate::clocks::ClockParameters;
use crate::interface::{Aperture, Interface};
use crate::low_level::LowLevel;
use crate::models::Model;
use crate::registers::Register;
use crate::Pipe;

/// The events in one dimension (horizontal or vertical) of the raster.
///
/// Horizontal values are in pixel clocks and vertical values are in lines.
/// Everything except `active` is stored in the "minus one" form the timing
/// registers use, so a dimension with 800 clocks per line has `total` 799.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimingDimension {
    pub active: u16,
    pub total: u16,
    pub blank_start: u16,
    pub blank_end: u16,
    pub sync_start: u16,
    pub sync_end: u16,
}

impl TimingDimension {
    /// Calculates a `TimingDimension` from the sizes of the individual
    /// periods in the cycle.
    ///
    /// A `TimingDimension` captures the number of steps _into_ a cycle where
    /// each event occurs, but when describing a mode we often speak of how
    /// many cycles each period has on its own, and so this function allows
    /// converting from the latter to the former.
    pub const fn calculate(active: u16, front_porch: u16, sync: u16, back_porch: u16) -> Self {
        let total = active + front_porch + sync + back_porch;
        Self {
            active,
            total: total - 1,
            blank_start: active - 1,
            blank_end: total - 1,
            sync_start: active + front_porch - 1,
            sync_end: active + front_porch + sync - 1,
        }
    }

    /// Returns the number of cycles in the whole period.
    pub const fn cycles(&self) -> u32 {
        self.total as u32 + 1
    }

    const fn total_reg(&self, doubled: bool) -> u32 {
        let active = if doubled { self.active } else { self.active - 1 };
        ((self.total as u32) << 16) | active as u32
    }

    const fn blank_reg(&self) -> u32 {
        ((self.blank_end as u32) << 16) | self.blank_start as u32
    }

    const fn sync_reg(&self) -> u32 {
        ((self.sync_end as u32) << 16) | self.sync_start as u32
    }
}

/// Mode flags carried by a [`TimingDescriptor`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TimingFlags {
    pub interlace: bool,
    pub line_double: bool,
    pub pixel_double: bool,
    /// The timing stands for a legacy VGA/VESA BIOS mode, programmed from
    /// [`vga::VGA_MODES`](crate::vga::VGA_MODES) by mode number instead of
    /// from the fields of the descriptor.
    pub legacy_vesa: bool,
}

/// The dimensions of the image a pipe reads, when they differ from the
/// active area of its timing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SourceSize {
    pub width: u16,
    pub height: u16,
}

/// The htotal value discovered by auto-tuning, cached in the descriptor so
/// that later mode sets with the same timing can skip the calibration.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TunedHtotal {
    /// Minus-one htotal to program in place of the descriptor's own.
    pub htotal: u16,
    /// Distance from the closed-form starting point at which the
    /// calibration converged.
    pub delta: i16,
    pub tuned: bool,
}

/// A complete description of a display mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimingDescriptor {
    pub width: u16,
    pub height: u16,
    /// Vertical refresh rate in Hz, for display only.
    pub refresh: u16,
    pub dot_clock_khz: u32,
    pub h: TimingDimension,
    pub v: TimingDimension,
    pub flags: TimingFlags,
    /// VGA/VESA mode number, meaningful only with `flags.legacy_vesa`.
    pub mode_number: u16,
    /// Set when this timing centers or scales a smaller legacy image.
    pub linked: Option<SourceSize>,
    pub reserved: TunedHtotal,
}

impl TimingDescriptor {
    pub const fn new(
        dot_clock_khz: u32,
        refresh: u16,
        h: TimingDimension,
        v: TimingDimension,
    ) -> Self {
        Self {
            width: h.active,
            height: v.active,
            refresh,
            dot_clock_khz,
            h,
            v,
            flags: TimingFlags {
                interlace: false,
                line_double: false,
                pixel_double: false,
                legacy_vesa: false,
            },
            mode_number: 0,
            linked: None,
            reserved: TunedHtotal {
                htotal: 0,
                delta: 0,
                tuned: false,
            },
        }
    }

    /// A timing standing for the given legacy VGA/VESA BIOS mode number.
    pub fn legacy_vga(mode_number: u16, base: Self) -> Self {
        let mut ret = base;
        ret.flags.legacy_vesa = true;
        ret.mode_number = mode_number;
        ret
    }

    /// 640x480 at 60Hz, the VGA mode.
    pub const MODE_640X480_60: Self = Self::new(
        25_175,
        60,
        TimingDimension::calculate(640, 16, 96, 48),
        TimingDimension::calculate(480, 10, 2, 33),
    );

    /// 800x600 at 60Hz, VESA.
    pub const MODE_800X600_60: Self = Self::new(
        40_000,
        60,
        TimingDimension::calculate(800, 40, 128, 88),
        TimingDimension::calculate(600, 1, 4, 23),
    );

    /// 1024x768 at 60Hz, VESA.
    pub const MODE_1024X768_60: Self = Self::new(
        65_000,
        60,
        TimingDimension::calculate(1024, 24, 136, 160),
        TimingDimension::calculate(768, 3, 6, 29),
    );

    /// The size of the image the pipe reads from its plane.
    pub fn source_size(&self) -> SourceSize {
        match self.linked {
            Some(linked) => linked,
            None => SourceSize {
                width: self.width,
                height: self.height,
            },
        }
    }

    /// Returns a copy of this timing with a different htotal, with the
    /// horizontal blank window moved by the same distance.
    pub fn with_htotal(&self, htotal: u16) -> Self {
        let delta = htotal as i32 - self.h.total as i32;
        let mut ret = *self;
        ret.h.total = htotal;
        ret.h.blank_start = shift(self.h.blank_start, delta);
        ret.h.blank_end = shift(self.h.blank_end, delta);
        ret
    }

    /// The register values for this timing, in the order they are written.
    pub fn registers(&self) -> [(Register, u32); 7] {
        let src = self.source_size();
        [
            (Register::HTOTAL, self.h.total_reg(self.flags.pixel_double)),
            (Register::HBLANK, self.h.blank_reg()),
            (Register::HSYNC, self.h.sync_reg()),
            (Register::VTOTAL, self.v.total_reg(self.flags.line_double)),
            (Register::VBLANK, self.v.blank_reg()),
            (Register::VSYNC, self.v.sync_reg()),
            (
                Register::PIPESRC,
                ((src.width as u32).saturating_sub(1) << 16)
                    | (src.height as u32).saturating_sub(1),
            ),
        ]
    }
}

fn shift(v: u16, delta: i32) -> u16 {
    (v as i32 + delta).max(0).min(u16::MAX as i32) as u16
}

/// Returns the htotal that keeps the line rate of `timing` unchanged when
/// the pipe actually runs at `clock` rather than at the requested dot clock.
pub fn scaled_htotal(timing: &TimingDescriptor, clock: &ClockParameters) -> u16 {
    let target = timing.dot_clock_khz as u64;
    if target == 0 {
        return timing.h.total;
    }
    let cycles = timing.h.cycles() as u64;
    let scaled = (cycles * clock.dot_clock_khz as u64 + target / 2) / target;
    scaled.saturating_sub(1).min(u16::MAX as u64) as u16
}

/// Writes the timing registers for `pipe` through each of the given
/// register windows.
///
/// Inputs are assumed to be valid. The clock is taken only so that its
/// frequency can appear in the log; the DPLL itself is programmed by the
/// sequencer around this call.
pub fn program_timing<M: Model, I: Interface>(
    ll: &mut LowLevel<M, I>,
    apertures: &[Aperture],
    pipe: Pipe,
    timing: &TimingDescriptor,
    clock: &ClockParameters,
) -> Result<(), I::Error> {
    log::debug!(
        "pipe {:?}: timing {}x{} htotal={} vtotal={} at {} kHz",
        pipe,
        timing.width,
        timing.height,
        timing.h.cycles(),
        timing.v.cycles(),
        clock.dot_clock_khz,
    );
    for (reg, v) in timing.registers().iter() {
        ll.wr_all(apertures, pipe, *reg, *v)?;
    }
    Ok(())
}
