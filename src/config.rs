/// Scan configuration, fixed for the lifetime of one scan run.
use core::time::Duration;

use crate::address::{parse_key, IdentityKey};
use crate::defaults;
use crate::distance::PathLoss;
use crate::error::{Error, Result};

/// Uppercased address fragment used in target mode.
///
/// Matches any address whose canonical form contains it, so a full address
/// or a prefix like `58:8E:81` both work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPattern(String);

impl TargetPattern {
    pub fn new(pattern: &str) -> Self {
        Self(pattern.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `canonical` must already be uppercase.
    pub fn matches(&self, canonical: &str) -> bool {
        canonical.contains(self.0.as_str())
    }
}

/// What a scan looks for. At most one of target / IRK can be active.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Report every device
    #[default]
    DiscoverAll,
    /// Only report devices whose address contains the pattern
    Target(TargetPattern),
    /// Report every device and check each against the IRK
    IdentityResolution(IdentityKey),
}

impl ScanMode {
    /// Pick the mode from optional user input. Supplying both is rejected.
    pub fn from_options(target: Option<&str>, key: Option<&str>) -> Result<Self> {
        let target = target.map(str::trim).filter(|t| !t.is_empty());
        let key = key.map(str::trim).filter(|k| !k.is_empty());
        match (target, key) {
            (Some(_), Some(_)) => Err(Error::ConflictingModes),
            (Some(t), None) => Ok(ScanMode::Target(TargetPattern::new(t))),
            (None, Some(k)) => Ok(ScanMode::IdentityResolution(parse_key(k)?)),
            (None, None) => Ok(ScanMode::DiscoverAll),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ScanMode::DiscoverAll => "discover",
            ScanMode::Target(_) => "target",
            ScanMode::IdentityResolution(_) => "irk",
        }
    }
}

/// Scan duty preference passed to the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPreference {
    /// Balanced duty cycle, no scan requests
    #[default]
    Passive,
    /// Low latency, sends scan requests for scan response data
    Active,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub mode: ScanMode,
    /// Minimum (smoothed) RSSI in dBm. Weaker advertisements are dropped.
    pub min_rssi: Option<i8>,
    /// Number of readings averaged per address. 1 disables smoothing.
    pub smoothing_window: usize,
    pub environment: PathLoss,
    /// Emit a proximity alert when a device is estimated within this many meters
    pub alert_within_m: Option<f64>,
    pub preference: ScanPreference,
    /// Stop automatically after this long. `None` scans until stopped.
    pub timeout: Option<Duration>,
}

impl ScanConfig {
    pub const fn new() -> Self {
        Self::with_timeout(Some(defaults::SCAN_TIMEOUT))
    }

    /// Defaults with another automatic stop; `None` scans until stopped.
    pub const fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            mode: ScanMode::DiscoverAll,
            min_rssi: None,
            smoothing_window: defaults::SMOOTHING_WINDOW,
            environment: PathLoss::FreeSpace,
            alert_within_m: None,
            preference: ScanPreference::Passive,
            timeout,
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=defaults::MAX_SMOOTHING_WINDOW).contains(&self.smoothing_window) {
            return Err(Error::InvalidSmoothingWindow);
        }
        if let Some(d) = self.alert_within_m {
            if !d.is_finite() || d <= 0.0 {
                return Err(Error::InvalidAlertDistance(d));
            }
        }
        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}
