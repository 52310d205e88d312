/// Error taxonomy for the resolution engine and scan session.
///
/// Filtered advertisements (below the RSSI floor, not matching the target)
/// and resolution mismatches are normal outcomes and never show up here.
use core::fmt;

/// Failure reported by the radio when a scan cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    /// The radio already has a scan registered
    AlreadyStarted,
    /// The scan client could not be registered with the radio
    RegistrationFailed,
    /// The radio stack reported an internal error
    InternalError,
    /// The requested scan feature is not supported by the controller
    Unsupported,
    /// Any other vendor-specific failure code
    Unknown(i32),
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFailure::AlreadyStarted => f.write_str("Scan already started"),
            ScanFailure::RegistrationFailed => f.write_str("App registration failed"),
            ScanFailure::InternalError => f.write_str("Internal error"),
            ScanFailure::Unsupported => f.write_str("Feature unsupported"),
            ScanFailure::Unknown(code) => write!(f, "Unknown error ({code})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("IRK must be exactly 16 bytes (32 hex chars), got {0} hex chars")]
    InvalidKeyFormat(usize),

    #[error("IRK contains invalid hex characters: {0}")]
    InvalidHexDigit(String),

    #[error("invalid address '{0}' (expected AA:BB:CC:DD:EE:FF)")]
    InvalidAddressFormat(String),

    #[error("BLE scanner not available")]
    RadioUnavailable,

    #[error("Bluetooth is not enabled")]
    RadioDisabled,

    #[error("Failed to start scan: {0}")]
    ScanStartFailed(ScanFailure),

    #[error("a target address and an IRK cannot be combined in one scan")]
    ConflictingModes,

    #[error("smoothing window must be between 1 and {}", crate::defaults::MAX_SMOOTHING_WINDOW)]
    InvalidSmoothingWindow,

    #[error("proximity alert distance must be a positive number of meters, got {0}")]
    InvalidAlertDistance(f64),

    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("invalid advertisement record: {0}")]
    InvalidAdvertisement(String),

    #[error("invalid host command: {0}")]
    InvalidCommand(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_failure_messages() {
        assert_eq!(ScanFailure::AlreadyStarted.to_string(), "Scan already started");
        assert_eq!(ScanFailure::Unknown(7).to_string(), "Unknown error (7)");
    }

    #[test]
    fn start_failure_wraps_cause() {
        let err = Error::ScanStartFailed(ScanFailure::Unsupported);
        assert_eq!(err.to_string(), "Failed to start scan: Feature unsupported");
    }

    #[test]
    fn window_error_names_the_bounds() {
        assert_eq!(
            Error::InvalidSmoothingWindow.to_string(),
            "smoothing window must be between 1 and 32"
        );
    }
}
