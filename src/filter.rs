/// Admission checks applied to every advertisement before it reaches the
/// registry's records.
///
/// A rejected advertisement is an expected outcome, not an error: it leaves
/// no trace in the records, counters, or event stream.
use crate::address::Address;
use crate::config::{ScanConfig, ScanMode};

/// Why an advertisement was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Effective RSSI is weaker than the configured floor
    BelowFloor,
    /// Target mode is active and the address does not contain the target
    NotTarget,
}

/// RSSI floor check on the effective (smoothed if enabled) RSSI.
pub fn check_floor(effective_rssi: i8, config: &ScanConfig) -> Result<(), Rejection> {
    match config.min_rssi {
        Some(min) if effective_rssi < min => Err(Rejection::BelowFloor),
        _ => Ok(()),
    }
}

/// Target filter. Passes everything outside target mode.
pub fn check_target(address: &Address, config: &ScanConfig) -> Result<(), Rejection> {
    match &config.mode {
        ScanMode::Target(pattern) => {
            // Display renders uppercase
            if pattern.matches(&address.to_string()) {
                Ok(())
            } else {
                Err(Rejection::NotTarget)
            }
        }
        _ => Ok(()),
    }
}
