use super::plb::{decode_one_hot_p1, dpll_mode, encode_one_hot_p1};
use super::Model;
use crate::clocks::{
    ClockLimits, ClockParameters, Divisors, DpllRegisters, Range, DPLL_MODE_LVDS, DPLL_MODE_MASK,
};
use crate::interface::Aperture;
use crate::plane::Depth;
use crate::registers::Register;
use crate::{Pipe, PortType};

/// Model type representing the Tunnel Creek (Atom E6xx) family of display
/// engines.
///
/// This family drives LVDS from pipe A through the primary register window,
/// and SDVO from pipe B through a companion PCI function whose register
/// window mirrors pipe B's timing registers. Several steppings carry errata
/// that this crate works around, selected by
/// [`Config::revision`](crate::config::Config::revision).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TNC;

/// PCI revision IDs of the steppings that matter to the errata below.
pub const REV_A0: u8 = 0;
pub const REV_B0: u8 = 1;
pub const REV_B1: u8 = 2;

const LVDS_REF_FREQ_KHZ: u32 = 200_000;
const SDVO_REF_FREQ_KHZ: u32 = 96_000;

static LVDS_LIMITS: ClockLimits = ClockLimits {
    m: Range::new(10, 35),
    n: Range::new(1, 4),
    p1: Range::new(2, 8),
    p2: 14,
    vco: Range::new(1_000_000, 2_000_000),
    m_offset: 0,
    n_offset: 0,
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

// The LVDS PLL's M divider is a 6-bit LFSR, so FP0 holds the LFSR state
// that produces each divide ratio rather than the ratio itself. Entry zero
// corresponds to the smallest M in LVDS_LIMITS.
static M_SCRAMBLE: [u8; 26] = [
    0x2b, 0x15, 0x2a, 0x35, 0x1a, 0x0d, 0x26, 0x33, 0x19, 0x2c, 0x36, 0x3b, 0x1d, 0x2e, 0x37,
    0x1b, 0x2d, 0x16, 0x0b, 0x25, 0x12, 0x09, 0x24, 0x32, 0x39, 0x1c,
];

static LVDS_APERTURES: [Aperture; 1] = [Aperture::Primary];
static SDVO_APERTURES: [Aperture; 2] = [Aperture::Primary, Aperture::Secondary];

impl Model for TNC {
    const NAME: &'static str = "Tunnel Creek";
    const PIPE_STATE: u32 = 1 << 30;
    const PIPE_INTERLACE: u32 = 0b100 << 21;
    const FIFO_WATERMARKS: [(Register, u32); 4] = [
        (Register::DSPARB, 0x0000_3f80),
        (Register::DSPFW1, 0x3f8f_0f0f),
        (Register::DSPFW2, 0x0b0c_0f0f),
        (Register::DSPFW3, 0x0000_0000),
    ];

    fn ref_freq_khz(port: PortType) -> u32 {
        match port {
            PortType::Lvds => LVDS_REF_FREQ_KHZ,
            PortType::Sdvo => SDVO_REF_FREQ_KHZ,
        }
    }

    fn clock_limits(port: PortType) -> &'static ClockLimits {
        match port {
            PortType::Lvds => &LVDS_LIMITS,
            PortType::Sdvo => &SDVO_LIMITS,
        }
    }

    fn fallback_clock(port: PortType) -> ClockParameters {
        let d = match port {
            PortType::Lvds => Divisors {
                m: 21,
                n: 4,
                p1: 3,
                p2: 14,
            },
            PortType::Sdvo => Divisors {
                m: 110,
                n: 6,
                p1: 7,
                p2: 10,
            },
        };
        ClockParameters::from_divisors(Self::ref_freq_khz(port), d)
    }

    fn encode_dpll(port: PortType, params: &ClockParameters) -> Option<DpllRegisters> {
        match port {
            PortType::Lvds => {
                if !LVDS_LIMITS.allows(&params.divisors()) {
                    return None;
                }
                let idx = (params.m - LVDS_LIMITS.m.min) as usize;
                let m = *M_SCRAMBLE.get(idx)? as u32;
                Some(DpllRegisters {
                    dpll: DPLL_MODE_LVDS | ((1 << (params.p1 - 2)) << 17),
                    fp: ((params.n & 0xf) << 16) | (m << 8),
                })
            }
            PortType::Sdvo => encode_one_hot_p1(port, &SDVO_LIMITS, params),
        }
    }

    fn decode_dpll(port: PortType, regs: DpllRegisters) -> Option<Divisors> {
        match port {
            PortType::Lvds => {
                if regs.dpll & DPLL_MODE_MASK != dpll_mode(port) {
                    return None;
                }
                let p1_bits = (regs.dpll >> 17) & 0x7f;
                if p1_bits.count_ones() != 1 {
                    return None;
                }
                let scrambled = ((regs.fp >> 8) & 0x3f) as u8;
                let idx = M_SCRAMBLE.iter().position(|v| *v == scrambled)?;
                let d = Divisors {
                    m: LVDS_LIMITS.m.min + idx as u32,
                    n: (regs.fp >> 16) & 0xf,
                    p1: p1_bits.trailing_zeros() + 2,
                    p2: LVDS_LIMITS.p2,
                };
                if LVDS_LIMITS.allows(&d) {
                    Some(d)
                } else {
                    None
                }
            }
            PortType::Sdvo => decode_one_hot_p1(port, &SDVO_LIMITS, regs),
        }
    }

    fn plane_depth_bits(depth: Depth) -> u32 {
        match depth {
            Depth::Bpp8 => 0b0010 << 26,
            Depth::Bpp16 => 0b0101 << 26,
            Depth::Bpp32 => 0b0111 << 26,
        }
    }

    fn apertures(port: PortType) -> &'static [Aperture] {
        match port {
            PortType::Lvds => &LVDS_APERTURES,
            PortType::Sdvo => &SDVO_APERTURES,
        }
    }

    fn supports(pipe: Pipe, port: PortType) -> bool {
        match port {
            PortType::Lvds => pipe == Pipe::A,
            PortType::Sdvo => pipe == Pipe::B,
        }
    }

    fn needs_clip_fix(revision: u8, port: PortType) -> bool {
        revision < REV_B1 && port == PortType::Sdvo
    }

    fn needs_other_pipe_disable(revision: u8) -> bool {
        revision < REV_B1
    }

    fn needs_htotal_tuning(revision: u8) -> bool {
        revision == REV_B0
    }
}
