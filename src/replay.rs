/// Replay radio: feeds recorded advertisements into a session.
///
/// Input is NDJSON, one advertisement per line:
///
/// ```text
/// {"addr":"70:81:94:0D:FB:AA","rssi":-62,"tx_power":-59,"mfr":{"76":"1219"},"uuids":[],"ts":1200}
/// ```
///
/// `addr` and `rssi` are required. `mfr` maps decimal company IDs to hex
/// payloads. Blank lines and lines starting with `#` are skipped.
use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use crate::address::Address;
use crate::config::ScanPreference;
use crate::error::{Error, Result, ScanFailure};
use crate::scanner::AdvertisementEvent;
use crate::session::{Radio, ReportHandle};

#[derive(Deserialize)]
struct AdvertRecord {
    addr: String,
    rssi: i8,
    #[serde(default)]
    tx_power: Option<i8>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mfr: BTreeMap<u16, String>,
    #[serde(default)]
    uuids: Vec<String>,
    #[serde(default)]
    ts: u64,
}

/// Parse one NDJSON advertisement line.
pub fn parse_line(line: &str) -> Result<AdvertisementEvent> {
    let record: AdvertRecord =
        serde_json::from_str(line).map_err(|e| Error::InvalidAdvertisement(e.to_string()))?;

    let address: Address = record.addr.parse()?;

    let mut manufacturer_data = BTreeMap::new();
    for (company, payload) in record.mfr {
        let bytes = hex::decode(payload.trim())
            .map_err(|e| Error::InvalidAdvertisement(format!("mfr 0x{company:04X}: {e}")))?;
        manufacturer_data.insert(company, bytes);
    }

    Ok(AdvertisementEvent {
        address,
        rssi: record.rssi,
        tx_power: record.tx_power,
        name: record.name,
        manufacturer_data,
        service_uuids: record.uuids,
        timestamp_ms: record.ts,
    })
}

/// Counts from one [`ReplayRadio::replay`] run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    pub delivered: usize,
    pub skipped: usize,
}

/// A radio whose reports come from the caller instead of hardware.
pub struct ReplayRadio {
    available: bool,
    enabled: bool,
    reject_with: Option<ScanFailure>,
    reports: Mutex<Option<ReportHandle>>,
    preference: Mutex<Option<ScanPreference>>,
}

impl ReplayRadio {
    pub const fn new() -> Self {
        Self {
            available: true,
            enabled: true,
            reject_with: None,
            reports: Mutex::new(None),
            preference: Mutex::new(None),
        }
    }

    /// No scanner present
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Scanner present but powered off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Refuses every scan request with `failure`
    pub fn rejecting(failure: ScanFailure) -> Self {
        Self {
            reject_with: Some(failure),
            ..Self::new()
        }
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.reports).is_some()
    }

    /// Preference passed to the last `start_scan`
    pub fn last_preference(&self) -> Option<ScanPreference> {
        *lock(&self.preference)
    }

    /// Hand one advertisement to the running scan. Returns false if no scan
    /// is running.
    pub fn deliver(&self, event: AdvertisementEvent) -> bool {
        let handle = lock(&self.reports).clone();
        match handle {
            Some(handle) => {
                handle.deliver(event);
                true
            }
            None => false,
        }
    }

    /// Simulate the radio failing mid-scan.
    pub fn fail(&self, failure: ScanFailure) {
        if let Some(handle) = lock(&self.reports).take() {
            handle.fail(failure);
        }
    }

    /// Deliver every advertisement in `input` until it ends or the scan
    /// stops. Malformed lines are logged and skipped.
    pub fn replay<R: BufRead>(&self, input: R) -> std::io::Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        for (n, line) in input.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Ok(event) => {
                    if !self.deliver(event) {
                        break;
                    }
                    summary.delivered += 1;
                }
                Err(e) => {
                    log::warn!("Skipping line {}: {}", n + 1, e);
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl Default for ReplayRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for ReplayRadio {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn start_scan(
        &self,
        preference: ScanPreference,
        reports: ReportHandle,
    ) -> core::result::Result<(), ScanFailure> {
        if let Some(failure) = self.reject_with {
            return Err(failure);
        }
        let mut current = lock(&self.reports);
        if current.is_some() {
            return Err(ScanFailure::AlreadyStarted);
        }
        *current = Some(reports);
        *lock(&self.preference) = Some(preference);
        Ok(())
    }

    fn stop_scan(&self) {
        lock(&self.reports).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
