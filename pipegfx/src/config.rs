//! Runtime configuration for an [`Engine`](crate::Engine).
//!
//! Differences between hardware families are chosen at compile time by the
//! [`Model`](crate::models::Model) type parameter. Everything here instead
//! varies between boards, steppings or integrations of the same family.

/// What to do when a polled hardware condition doesn't occur before its
/// deadline.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimeoutPolicy {
    /// Abort the operation with [`Error::Timeout`](crate::error::Error::Timeout).
    Strict,

    /// Log a warning and carry on as if the condition had occurred. The
    /// register write that should have caused it has already been issued,
    /// so only the confirmation is missing.
    LogAndContinue,
}

/// What to do when no PLL configuration is close enough to a requested dot
/// clock.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClockFailurePolicy {
    /// Abort the mode set before touching any register.
    Refuse,

    /// Substitute the model's documented fallback clock and log a warning.
    UseFallback,
}

/// Where the port's pixel clock comes from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PixelClockSource {
    /// The DPLL's own oscillator, with the configured tolerance.
    Internal,

    /// An external clock that the DPLL must reproduce exactly.
    External,
}

/// How the host is using the display outputs, which decides whether htotal
/// auto-tuning applies.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DisplayConfig {
    Single,
    SingleTvOut,
    Clone,
    Extended,
}

impl DisplayConfig {
    /// Returns `true` for the configurations where both pipes are running.
    pub const fn is_dual(self) -> bool {
        match self {
            DisplayConfig::Clone | DisplayConfig::Extended => true,
            DisplayConfig::Single | DisplayConfig::SingleTvOut => false,
        }
    }
}

/// Settings for an [`Engine`](crate::Engine).
///
/// This behaves as a "builder" type, with methods that modify its
/// parameters.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) revision: u8,
    pub(crate) timeout_policy: TimeoutPolicy,
    pub(crate) clock_policy: ClockFailurePolicy,
    pub(crate) clock_tolerance_ppm: u32,
    pub(crate) pixel_clock_source: PixelClockSource,
    pub(crate) display_config: DisplayConfig,
    pub(crate) htotal_tuning: bool,
    pub(crate) ref_freq_khz: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            revision: 0,
            timeout_policy: TimeoutPolicy::Strict,
            clock_policy: ClockFailurePolicy::Refuse,
            clock_tolerance_ppm: 5_000,
            pixel_clock_source: PixelClockSource::Internal,
            display_config: DisplayConfig::Single,
            htotal_tuning: true,
            ref_freq_khz: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        core::default::Default::default()
    }

    /// The silicon revision, as the PCI revision ID reports it.
    pub fn revision<'a>(&'a mut self, v: u8) -> &'a mut Self {
        self.revision = v;
        self
    }

    pub fn timeout_policy<'a>(&'a mut self, v: TimeoutPolicy) -> &'a mut Self {
        self.timeout_policy = v;
        self
    }

    pub fn clock_policy<'a>(&'a mut self, v: ClockFailurePolicy) -> &'a mut Self {
        self.clock_policy = v;
        self
    }

    /// Largest acceptable distance between the requested and synthesized
    /// dot clocks, in parts per million.
    pub fn clock_tolerance_ppm<'a>(&'a mut self, v: u32) -> &'a mut Self {
        self.clock_tolerance_ppm = v;
        self
    }

    pub fn pixel_clock_source<'a>(&'a mut self, v: PixelClockSource) -> &'a mut Self {
        self.pixel_clock_source = v;
        self
    }

    pub fn display_config<'a>(&'a mut self, v: DisplayConfig) -> &'a mut Self {
        self.display_config = v;
        self
    }

    /// Allows htotal auto-tuning on revisions that need it. Disabling this
    /// also discards any calibration in progress at the next mode set.
    pub fn htotal_tuning<'a>(&'a mut self, v: bool) -> &'a mut Self {
        self.htotal_tuning = v;
        self
    }

    /// Overrides the model's reference clock frequency for every port.
    pub fn ref_freq_khz<'a>(&'a mut self, v: Option<u32>) -> &'a mut Self {
        self.ref_freq_khz = v;
        self
    }

    pub(crate) fn effective_tolerance_ppm(&self) -> u32 {
        match self.pixel_clock_source {
            PixelClockSource::Internal => self.clock_tolerance_ppm,
            PixelClockSource::External => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let mut c = Config::new();
        c.revision(1)
            .display_config(DisplayConfig::Clone)
            .clock_tolerance_ppm(100);
        assert_eq!(c.revision, 1);
        assert_eq!(c.timeout_policy, TimeoutPolicy::Strict);
        assert_eq!(c.effective_tolerance_ppm(), 100);
        c.pixel_clock_source(PixelClockSource::External);
        assert_eq!(c.effective_tolerance_ppm(), 0);
    }
}
