//! DPLL divider search.
//!
//! The pixel clock is produced by a PLL which multiplies a fixed reference
//! clock by M and divides it by N and by the post-dividers P1 and P2. Only
//! integer divider values within a model-specific table are possible, so
//! [`synthesize`] searches that table for the achievable frequency closest
//! to the one a timing asks for.

use crate::models::Model;
use crate::PortType;
use core::ops::RangeInclusive;

/// `DPLL` bit enabling the PLL's oscillator.
pub const DPLL_VCO_ENABLE: u32 = 1 << 31;

/// `DPLL` mode field value for a PLL driving an SDVO port.
pub const DPLL_MODE_SDVO: u32 = 1 << 26;

/// `DPLL` mode field value for a PLL driving an LVDS port.
pub const DPLL_MODE_LVDS: u32 = 2 << 26;

pub(crate) const DPLL_MODE_MASK: u32 = 3 << 26;

/// An inclusive range of divider or frequency values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: u32,
    pub max: u32,
}

impl Range {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub const fn contains(self, v: u32) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn iter(self) -> RangeInclusive<u32> {
        self.min..=self.max
    }
}

/// The divider search space for one port type of one model.
///
/// M and N ranges are given as the values the registers hold. Some PLLs
/// divide by a value slightly larger than the register holds, which
/// `m_offset` and `n_offset` describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockLimits {
    pub m: Range,
    pub n: Range,
    pub p1: Range,
    /// P2 is fixed for each port type.
    pub p2: u32,
    /// Allowed oscillator frequencies, in kHz.
    pub vco: Range,
    pub m_offset: u32,
    pub n_offset: u32,
}

impl ClockLimits {
    /// Returns `true` if the given effective divisors are inside this
    /// search space.
    pub fn allows(&self, d: &Divisors) -> bool {
        d.m >= self.m_offset
            && d.n >= self.n_offset
            && self.m.contains(d.m - self.m_offset)
            && self.n.contains(d.n - self.n_offset)
            && self.p1.contains(d.p1)
            && d.p2 == self.p2
    }
}

/// The values a PLL actually multiplies and divides by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divisors {
    pub m: u32,
    pub n: u32,
    pub p1: u32,
    pub p2: u32,
}

/// A fully-resolved PLL configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockParameters {
    pub ref_freq_khz: u32,
    pub m: u32,
    pub n: u32,
    pub p1: u32,
    pub p2: u32,
    /// The frequency these parameters produce, rounded to the nearest kHz.
    pub dot_clock_khz: u32,
}

impl ClockParameters {
    pub const fn from_divisors(ref_freq_khz: u32, d: Divisors) -> Self {
        Self {
            ref_freq_khz,
            m: d.m,
            n: d.n,
            p1: d.p1,
            p2: d.p2,
            dot_clock_khz: achievable_khz(ref_freq_khz, d.m, d.n, d.p1 * d.p2),
        }
    }

    pub const fn divisors(&self) -> Divisors {
        Divisors {
            m: self.m,
            n: self.n,
            p1: self.p1,
            p2: self.p2,
        }
    }

    /// Recomputes the output frequency from the divisors alone.
    pub const fn reconstruct_khz(&self) -> u32 {
        achievable_khz(self.ref_freq_khz, self.m, self.n, self.p1 * self.p2)
    }

    /// Encodes these parameters for the given model's DPLL registers, or
    /// returns `None` if the port's PLL can't be set to them.
    pub fn encode<M: Model>(&self, port: PortType) -> Option<DpllRegisters> {
        M::encode_dpll(port, self)
    }
}

/// Values for a pipe's `DPLL` and `FP0` registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpllRegisters {
    pub dpll: u32,
    pub fp: u32,
}

/// Returned when no divisors in the search space come close enough to the
/// requested frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceFailure {
    pub target_khz: u32,
    /// The closest candidate found, if any candidate was inside the
    /// oscillator range at all.
    pub best: Option<ClockParameters>,
    pub best_error_ppm: Option<u32>,
    pub tolerance_ppm: u32,
}

impl core::fmt::Display for ConvergenceFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.best_error_ppm {
            Some(err) => write!(
                f,
                "no divisors within {} ppm of {} kHz (closest is {} ppm away)",
                self.tolerance_ppm, self.target_khz, err
            ),
            None => write!(f, "no divisors can produce {} kHz", self.target_khz),
        }
    }
}

/// The frequency, in kHz rounded to nearest, produced by the given
/// effective divisors, where `pdiv` is P1 × P2.
pub const fn achievable_khz(ref_freq_khz: u32, m: u32, n: u32, pdiv: u32) -> u32 {
    let num = ref_freq_khz as u64 * m as u64;
    let den = n as u64 * pdiv as u64;
    if den == 0 {
        return 0;
    }
    ((num + den / 2) / den) as u32
}

/// The distance between `actual` and `target`, in parts per million of
/// `target`.
pub const fn error_ppm(actual: u32, target: u32) -> u32 {
    let diff = if actual > target {
        actual - target
    } else {
        target - actual
    };
    ((diff as u64 * 1_000_000) / target as u64) as u32
}

/// Searches the given model's divider table for the given port.
///
/// This is a pure function of its arguments. See [`search`] for details.
pub fn synthesize<M: Model>(
    target_khz: u32,
    ref_freq_khz: u32,
    port: PortType,
    tolerance_ppm: u32,
) -> Result<ClockParameters, ConvergenceFailure> {
    search(target_khz, ref_freq_khz, M::clock_limits(port), tolerance_ppm)
}

/// Finds the divisors within `limits` whose output is closest to
/// `target_khz`, failing if even the closest is more than `tolerance_ppm`
/// away.
///
/// A tolerance of zero demands an exact match. Candidates whose oscillator
/// would have to run outside the VCO range to produce the target are
/// skipped. When several candidates are equally close, the first one in
/// (M, N, P1) ascending order wins.
pub fn search(
    target_khz: u32,
    ref_freq_khz: u32,
    limits: &ClockLimits,
    tolerance_ppm: u32,
) -> Result<ClockParameters, ConvergenceFailure> {
    let mut best: Option<(u32, ClockParameters)> = None;

    if target_khz == 0 {
        return Err(ConvergenceFailure {
            target_khz,
            best: None,
            best_error_ppm: None,
            tolerance_ppm,
        });
    }

    'search: for m_reg in limits.m.iter() {
        let m = m_reg + limits.m_offset;
        for n_reg in limits.n.iter() {
            let n = n_reg + limits.n_offset;
            let mut highest = None;
            for p1 in limits.p1.iter() {
                let pdiv = p1 * limits.p2;
                let target_vco = target_khz as u64 * pdiv as u64;
                if target_vco < limits.vco.min as u64 || target_vco > limits.vco.max as u64 {
                    continue;
                }

                let actual = achievable_khz(ref_freq_khz, m, n, pdiv);
                let err = error_ppm(actual, target_khz);
                if highest.is_none() {
                    highest = Some(actual);
                }
                if best.map_or(true, |(best_err, _)| err < best_err) {
                    best = Some((
                        err,
                        ClockParameters {
                            ref_freq_khz,
                            m,
                            n,
                            p1,
                            p2: limits.p2,
                            dot_clock_khz: actual,
                        },
                    ));
                    if err == 0 {
                        break 'search;
                    }
                }

                // Larger P1 only divides further.
                if actual < target_khz {
                    break;
                }
            }

            // Larger N lowers every candidate, and this N was already too
            // low at its fastest.
            if let Some(fastest) = highest {
                if fastest < target_khz {
                    break;
                }
            }
        }
    }

    match best {
        Some((err, params)) if err <= tolerance_ppm => {
            log::debug!(
                "clock: {} kHz from ref {} kHz -> m={} n={} p1={} p2={} ({} kHz, {} ppm)",
                target_khz,
                ref_freq_khz,
                params.m,
                params.n,
                params.p1,
                params.p2,
                params.dot_clock_khz,
                err,
            );
            Ok(params)
        }
        Some((err, params)) => Err(ConvergenceFailure {
            target_khz,
            best: Some(params),
            best_error_ppm: Some(err),
            tolerance_ppm,
        }),
        None => Err(ConvergenceFailure {
            target_khz,
            best: None,
            best_error_ppm: None,
            tolerance_ppm,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plb::PLB;
    use crate::models::tnc::TNC;

    // The straightforward search with no early exits, to check that the
    // early exits never change the answer.
    fn exhaustive(target: u32, ref_freq: u32, limits: &ClockLimits) -> Option<(u32, u32)> {
        let mut best: Option<(u32, u32)> = None;
        for m in limits.m.iter() {
            for n in limits.n.iter() {
                for p1 in limits.p1.iter() {
                    let pdiv = p1 * limits.p2;
                    if !limits.vco.contains(target * pdiv) {
                        continue;
                    }
                    let actual =
                        achievable_khz(ref_freq, m + limits.m_offset, n + limits.n_offset, pdiv);
                    let err = error_ppm(actual, target);
                    if best.map_or(true, |(e, _)| err < e) {
                        best = Some((err, actual));
                    }
                }
            }
        }
        best
    }

    #[test]
    fn test_vga_dot_clock_on_lvds() {
        let limits = PLB::clock_limits(PortType::Lvds);
        let got = synthesize::<PLB>(25175, 96000, PortType::Lvds, 5_000).unwrap();
        assert!(error_ppm(got.reconstruct_khz(), 25175) <= 5_000);
        assert_eq!(got.reconstruct_khz(), got.dot_clock_khz);
        assert!(limits.allows(&got.divisors()));

        let (best_err, best_khz) = exhaustive(25175, 96000, limits).unwrap();
        assert_eq!(error_ppm(got.dot_clock_khz, 25175), best_err);
        assert_eq!(got.dot_clock_khz, best_khz);
    }

    #[test]
    fn test_deterministic() {
        for target in [25175, 40000, 65000, 108000].iter() {
            let a = synthesize::<PLB>(*target, 96000, PortType::Sdvo, 10_000);
            let b = synthesize::<PLB>(*target, 96000, PortType::Sdvo, 10_000);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_early_exit_matches_exhaustive() {
        for port in [PortType::Lvds, PortType::Sdvo].iter() {
            let limits = TNC::clock_limits(*port);
            let ref_freq = TNC::ref_freq_khz(*port);
            for target in [33000, 51200, 65000, 74250].iter() {
                let want = exhaustive(*target, ref_freq, limits);
                let got = search(*target, ref_freq, limits, u32::MAX);
                match (want, got) {
                    (Some((err, _)), Ok(got)) => {
                        assert_eq!(error_ppm(got.dot_clock_khz, *target), err)
                    }
                    (None, Err(fail)) => assert_eq!(fail.best, None),
                    (want, got) => panic!("mismatch: {:?} vs {:?}", want, got),
                }
            }
        }
    }

    #[test]
    fn test_exact_match_required() {
        // 96 MHz * 75 / (3 * 5 * 10) is exactly 48 MHz.
        let got = synthesize::<PLB>(48000, 96000, PortType::Sdvo, 0).unwrap();
        assert_eq!(got.dot_clock_khz, 48000);
        assert_eq!((got.m, got.n, got.p1, got.p2), (75, 3, 5, 10));

        let err = synthesize::<PLB>(25175, 96000, PortType::Sdvo, 0).unwrap_err();
        assert_eq!(err.tolerance_ppm, 0);
        assert!(err.best.is_some());
        assert!(err.best_error_ppm.unwrap() > 0);
    }

    #[test]
    fn test_outside_vco_range() {
        let err = synthesize::<PLB>(1000, 96000, PortType::Lvds, u32::MAX).unwrap_err();
        assert_eq!(err.best, None);
        assert_eq!(err.best_error_ppm, None);

        let err = synthesize::<PLB>(0, 96000, PortType::Lvds, u32::MAX).unwrap_err();
        assert_eq!(err.best, None);
    }

    #[test]
    fn test_error_ppm() {
        assert_eq!(error_ppm(25175, 25175), 0);
        assert_eq!(error_ppm(25000, 25000 * 2), 500_000);
        assert_eq!(error_ppm(101, 100), 10_000);
        assert_eq!(error_ppm(99, 100), 10_000);
    }
}
