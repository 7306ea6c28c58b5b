use super::Model;
use crate::clocks::{
    ClockLimits, ClockParameters, Divisors, DpllRegisters, Range, DPLL_MODE_LVDS, DPLL_MODE_MASK,
    DPLL_MODE_SDVO,
};
use crate::interface::Aperture;
use crate::plane::Depth;
use crate::registers::Register;
use crate::{Pipe, PortType};

/// Model type representing the Poulsbo (US15W) family of display engines.
///
/// This type is used only at compile time as a type parameter, or as an
/// empty (compile-time-only) argument in order to influence selection of
/// a type parameter on a function call that wouldn't naturally imply one.
///
/// All of this family's display registers live in a single register window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PLB;

const REF_FREQ_KHZ: u32 = 96_000;

static LVDS_LIMITS: ClockLimits = ClockLimits {
    m: Range::new(68, 118),
    n: Range::new(1, 6),
    p1: Range::new(1, 8),
    p2: 14,
    vco: Range::new(1_400_000, 2_800_000),
    m_offset: 2,
    n_offset: 2,
};

static SDVO_LIMITS: ClockLimits = ClockLimits {
    m: Range::new(68, 118),
    n: Range::new(1, 6),
    p1: Range::new(1, 8),
    p2: 10,
    vco: Range::new(1_400_000, 2_800_000),
    m_offset: 2,
    n_offset: 2,
};

static APERTURES: [Aperture; 1] = [Aperture::Primary];

impl Model for PLB {
    const NAME: &'static str = "Poulsbo";
    const PIPE_STATE: u32 = 1 << 30;
    const PIPE_INTERLACE: u32 = 0b110 << 21;
    const FIFO_WATERMARKS: [(Register, u32); 4] = [
        (Register::DSPARB, 0x0000_3f80),
        (Register::DSPFW1, 0x3f8f_0f18),
        (Register::DSPFW2, 0x0414_0f0f),
        (Register::DSPFW3, 0x0000_0000),
    ];

    fn ref_freq_khz(_port: PortType) -> u32 {
        REF_FREQ_KHZ
    }

    fn clock_limits(port: PortType) -> &'static ClockLimits {
        match port {
            PortType::Lvds => &LVDS_LIMITS,
            PortType::Sdvo => &SDVO_LIMITS,
        }
    }

    fn fallback_clock(port: PortType) -> ClockParameters {
        // The closest this PLL gets to the 25.175 MHz VGA dot clock.
        let p1 = match port {
            PortType::Lvds => 5,
            PortType::Sdvo => 7,
        };
        ClockParameters::from_divisors(
            REF_FREQ_KHZ,
            Divisors {
                m: 110,
                n: 6,
                p1,
                p2: Self::clock_limits(port).p2,
            },
        )
    }

    fn encode_dpll(port: PortType, params: &ClockParameters) -> Option<DpllRegisters> {
        encode_one_hot_p1(port, Self::clock_limits(port), params)
    }

    fn decode_dpll(port: PortType, regs: DpllRegisters) -> Option<Divisors> {
        decode_one_hot_p1(port, Self::clock_limits(port), regs)
    }

    fn plane_depth_bits(depth: Depth) -> u32 {
        match depth {
            Depth::Bpp8 => 0b0010 << 26,
            Depth::Bpp16 => 0b0101 << 26,
            Depth::Bpp32 => 0b0110 << 26,
        }
    }

    fn apertures(_port: PortType) -> &'static [Aperture] {
        &APERTURES
    }

    fn supports(pipe: Pipe, port: PortType) -> bool {
        match port {
            // The LVDS transmitter can only be fed by pipe B.
            PortType::Lvds => pipe == Pipe::B,
            PortType::Sdvo => true,
        }
    }
}

pub(crate) fn dpll_mode(port: PortType) -> u32 {
    match port {
        PortType::Lvds => DPLL_MODE_LVDS,
        PortType::Sdvo => DPLL_MODE_SDVO,
    }
}

// FP0 holds the register-domain N in bits 16..21 and M in bits 0..7, and
// the DPLL holds P1 as a single set bit in bits 16..23.
pub(crate) fn encode_one_hot_p1(
    port: PortType,
    limits: &ClockLimits,
    params: &ClockParameters,
) -> Option<DpllRegisters> {
    if !limits.allows(&params.divisors()) {
        return None;
    }
    let m = params.m - limits.m_offset;
    let n = params.n - limits.n_offset;
    Some(DpllRegisters {
        dpll: dpll_mode(port) | ((1 << (params.p1 - 1)) << 16),
        fp: ((n & 0x3f) << 16) | (m & 0xff),
    })
}

pub(crate) fn decode_one_hot_p1(
    port: PortType,
    limits: &ClockLimits,
    regs: DpllRegisters,
) -> Option<Divisors> {
    if regs.dpll & DPLL_MODE_MASK != dpll_mode(port) {
        return None;
    }
    let p1_bits = (regs.dpll >> 16) & 0xff;
    if p1_bits.count_ones() != 1 {
        return None;
    }
    let d = Divisors {
        m: (regs.fp & 0xff) + limits.m_offset,
        n: ((regs.fp >> 16) & 0x3f) + limits.n_offset,
        p1: p1_bits.trailing_zeros() + 1,
        p2: limits.p2,
    };
    if limits.allows(&d) {
        Some(d)
    } else {
        None
    }
}
