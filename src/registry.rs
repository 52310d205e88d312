/// Device registry: folds advertisements into one record per address.
///
/// Records live in an arena (`Vec<DeviceRecord>`) indexed by address. Each
/// call to [`DeviceRegistry::ingest`] applies smoothing, the RSSI floor,
/// distance estimation, the mode-specific logic (IRK resolution or target
/// filter), and the proximity check, and returns the derived events in the
/// order they must be published.
use core::time::Duration;
use std::collections::{BTreeMap, HashMap};

use crate::address::{resolve, Address};
use crate::config::{ScanConfig, ScanMode};
use crate::distance::estimate_distance;
use crate::filter::{self, Rejection};
use crate::scanner::AdvertisementEvent;
use crate::session::SessionEvent;
use crate::smoother::SignalSmoother;

/// Outcome of checking a device against the IRK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The address was generated from the IRK
    Resolved,
    /// The address is an RPA but the IRK did not generate it
    NotResolved,
    /// The address is not an RPA, so no IRK can resolve it
    NotApplicable,
}

impl Resolution {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Resolution::Resolved => "resolved",
            Resolution::NotResolved => "not_resolved",
            Resolution::NotApplicable => "n/a",
        }
    }
}

/// Everything known about one address.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub address: Address,
    pub name: Option<String>,
    /// Raw RSSI of the latest advertisement
    pub rssi: i8,
    /// Windowed mean, only when smoothing is enabled
    pub smoothed_rssi: Option<i8>,
    pub tx_power: Option<i8>,
    pub distance_m: Option<f64>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_uuids: Vec<String>,
    /// Accepted advertisements from this address, at least 1
    pub detection_count: u32,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    /// Only set in IRK resolution mode
    pub resolution: Option<Resolution>,
    /// Computed once when the record is created
    pub private_resolvable: bool,
}

impl DeviceRecord {
    /// RSSI used for filtering and distance
    pub fn effective_rssi(&self) -> i8 {
        self.smoothed_rssi.unwrap_or(self.rssi)
    }

    pub fn address_kind(&self) -> &'static str {
        if self.private_resolvable {
            "RPA"
        } else {
            "Public/Static"
        }
    }
}

/// Counters for one scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatistics {
    pub total_detections: u64,
    pub unique_devices: usize,
    pub identity_matches: u64,
    /// Distinct addresses resolved at least once
    pub resolved_addresses: usize,
    /// Known devices using a resolvable private address
    pub private_addresses: usize,
    pub elapsed: Duration,
}

/// Result of [`DeviceRegistry::ingest`]
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Record updated; events to publish, in order
    Accepted(Vec<SessionEvent>),
    /// Dropped without touching any record
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    config: ScanConfig,
    smoother: Option<SignalSmoother>,
    index: HashMap<Address, usize>,
    records: Vec<DeviceRecord>,
    /// Address → number of positive IRK matches
    resolved: HashMap<Address, u32>,
    total_detections: u64,
    identity_matches: u64,
}

impl DeviceRegistry {
    pub fn new(config: ScanConfig) -> Self {
        let window = config.smoothing_window;
        let smoother = (window > 1).then(|| SignalSmoother::new(window));
        Self {
            config,
            smoother,
            index: HashMap::new(),
            records: Vec::new(),
            resolved: HashMap::new(),
            total_detections: 0,
            identity_matches: 0,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Fold one advertisement into the registry.
    pub fn ingest(&mut self, event: &AdvertisementEvent) -> Admission {
        let address = event.address;
        let known = self.index.get(&address).copied();
        let private = match known {
            Some(i) => self.records[i].private_resolvable,
            None => address.is_private_resolvable(),
        };

        // The window is fed even if the floor rejects this reading
        let smoothed = self.smoother.as_mut().map(|s| s.update(address, event.rssi));
        let effective = smoothed.unwrap_or(event.rssi);

        if let Err(rejection) = filter::check_floor(effective, &self.config) {
            return Admission::Rejected(rejection);
        }

        let distance = estimate_distance(effective, event.tx_power, self.config.environment);

        self.total_detections += 1;

        let resolution = match &self.config.mode {
            ScanMode::IdentityResolution(key) => Some(if !private {
                Resolution::NotApplicable
            } else if resolve(key, &address) {
                Resolution::Resolved
            } else {
                Resolution::NotResolved
            }),
            ScanMode::Target(_) => {
                if let Err(rejection) = filter::check_target(&address, &self.config) {
                    return Admission::Rejected(rejection);
                }
                None
            }
            ScanMode::DiscoverAll => None,
        };

        let is_update = known.is_some();
        let device = self.upsert(known, event, smoothed, distance, resolution, private).clone();

        let mut events = Vec::with_capacity(3);

        if resolution == Some(Resolution::Resolved) {
            self.identity_matches += 1;
            *self.resolved.entry(address).or_insert(0) += 1;
            log::debug!("IRK match: {} (rssi {})", address, effective);
            events.push(SessionEvent::IdentityMatched(device.clone()));
        }

        if matches!(self.config.mode, ScanMode::Target(_)) {
            log::debug!("Target found: {} (rssi {})", address, effective);
            events.push(SessionEvent::TargetFound(device.clone()));
        }

        let proximity = match (self.config.alert_within_m, distance) {
            (Some(limit), Some(d)) if d <= limit => Some(d),
            _ => None,
        };

        match proximity {
            Some(distance_m) => {
                events.push(SessionEvent::DeviceUpdated {
                    device: device.clone(),
                    is_update,
                });
                events.push(SessionEvent::ProximityAlert { device, distance_m });
            }
            None => events.push(SessionEvent::DeviceUpdated { device, is_update }),
        }

        Admission::Accepted(events)
    }

    fn upsert(
        &mut self,
        known: Option<usize>,
        event: &AdvertisementEvent,
        smoothed: Option<i8>,
        distance: Option<f64>,
        resolution: Option<Resolution>,
        private: bool,
    ) -> &DeviceRecord {
        let idx = match known {
            Some(i) => {
                let r = &mut self.records[i];
                r.detection_count = r.detection_count.saturating_add(1);
                r.last_seen_ms = r.last_seen_ms.max(event.timestamp_ms);
                i
            }
            None => {
                let i = self.records.len();
                self.records.push(DeviceRecord {
                    address: event.address,
                    name: None,
                    rssi: event.rssi,
                    smoothed_rssi: None,
                    tx_power: None,
                    distance_m: None,
                    manufacturer_data: BTreeMap::new(),
                    service_uuids: Vec::new(),
                    detection_count: 1,
                    first_seen_ms: event.timestamp_ms,
                    last_seen_ms: event.timestamp_ms,
                    resolution: None,
                    private_resolvable: private,
                });
                self.index.insert(event.address, i);
                i
            }
        };

        let r = &mut self.records[idx];
        r.name = event.name.clone();
        r.rssi = event.rssi;
        r.smoothed_rssi = smoothed;
        r.tx_power = event.tx_power;
        r.distance_m = distance;
        r.manufacturer_data = event.manufacturer_data.clone();
        r.service_uuids = event.service_uuids.clone();
        r.resolution = resolution;
        r
    }

    pub fn device(&self, address: &Address) -> Option<&DeviceRecord> {
        self.index.get(address).map(|&i| &self.records[i])
    }

    /// Copy of every record, in first-seen order
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolved addresses with their match counts
    pub fn resolved_addresses(&self) -> BTreeMap<Address, u32> {
        self.resolved.iter().map(|(a, n)| (*a, *n)).collect()
    }

    pub fn statistics(&self, elapsed: Duration) -> ScanStatistics {
        ScanStatistics {
            total_detections: self.total_detections,
            unique_devices: self.records.len(),
            identity_matches: self.identity_matches,
            resolved_addresses: self.resolved.len(),
            private_addresses: self.records.iter().filter(|r| r.private_resolvable).count(),
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{parse_key, IdentityKey};
    use crate::config::TargetPattern;

    const PUBLIC: Address = Address::new([0x00, 0x1B, 0xD8, 0x01, 0x02, 0x03]);
    const OTHER: Address = Address::new([0xC0, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn key() -> IdentityKey {
        parse_key("ec0234a357c8ad05341010a60a397d9b").unwrap()
    }

    fn adv(address: Address, rssi: i8, ts: u64) -> AdvertisementEvent {
        AdvertisementEvent::new(address, rssi, ts)
    }

    fn accepted(admission: Admission) -> Vec<SessionEvent> {
        match admission {
            Admission::Accepted(events) => events,
            Admission::Rejected(r) => panic!("unexpected rejection: {r:?}"),
        }
    }

    #[test]
    fn first_observation_creates_record() {
        let mut reg = DeviceRegistry::new(ScanConfig::new());
        let events = accepted(reg.ingest(&adv(PUBLIC, -60, 100)));

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::DeviceUpdated { is_update: false, .. }));

        let rec = reg.device(&PUBLIC).unwrap();
        assert_eq!(rec.detection_count, 1);
        assert_eq!(rec.first_seen_ms, 100);
        assert_eq!(rec.last_seen_ms, 100);
        assert_eq!(rec.resolution, None);
        assert_eq!(rec.smoothed_rssi, None);
        assert!(!rec.private_resolvable);
    }

    #[test]
    fn repeat_observation_carries_count_and_first_seen() {
        let mut reg = DeviceRegistry::new(ScanConfig::new());
        reg.ingest(&adv(PUBLIC, -60, 100));

        let mut second = adv(PUBLIC, -50, 250);
        second.name = Some("Tag".into());
        second.manufacturer_data.insert(0x004C, vec![1, 2]);
        let events = accepted(reg.ingest(&second));
        assert!(matches!(events[0], SessionEvent::DeviceUpdated { is_update: true, .. }));

        let rec = reg.device(&PUBLIC).unwrap();
        assert_eq!(rec.detection_count, 2);
        assert_eq!(rec.first_seen_ms, 100);
        assert_eq!(rec.last_seen_ms, 250);
        assert_eq!(rec.rssi, -50);
        assert_eq!(rec.name.as_deref(), Some("Tag"));

        // Metadata is last-observed-wins
        reg.ingest(&adv(PUBLIC, -55, 300));
        let rec = reg.device(&PUBLIC).unwrap();
        assert_eq!(rec.name, None);
        assert!(rec.manufacturer_data.is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn out_of_order_timestamp_keeps_last_seen() {
        let mut reg = DeviceRegistry::new(ScanConfig::new());
        reg.ingest(&adv(PUBLIC, -60, 500));
        reg.ingest(&adv(PUBLIC, -60, 200));
        let rec = reg.device(&PUBLIC).unwrap();
        assert_eq!(rec.first_seen_ms, 500);
        assert_eq!(rec.last_seen_ms, 500);
    }

    #[test]
    fn floor_discards_without_counting() {
        let mut config = ScanConfig::new();
        config.min_rssi = Some(-60);
        let mut reg = DeviceRegistry::new(config);

        accepted(reg.ingest(&adv(PUBLIC, -55, 0)));
        assert_eq!(reg.ingest(&adv(PUBLIC, -65, 1)), Admission::Rejected(Rejection::BelowFloor));

        assert_eq!(reg.device(&PUBLIC).unwrap().detection_count, 1);
        assert_eq!(reg.statistics(Duration::ZERO).total_detections, 1);
    }

    #[test]
    fn floor_applies_to_smoothed_value() {
        let mut config = ScanConfig::new();
        config.min_rssi = Some(-70);
        config.smoothing_window = 2;
        let mut reg = DeviceRegistry::new(config);

        accepted(reg.ingest(&adv(PUBLIC, -60, 0)));
        // Raw -78 is below the floor but the mean (-69) is not
        accepted(reg.ingest(&adv(PUBLIC, -78, 1)));
        let rec = reg.device(&PUBLIC).unwrap();
        assert_eq!(rec.smoothed_rssi, Some(-69));
        assert_eq!(rec.rssi, -78);
        assert_eq!(rec.effective_rssi(), -69);
    }

    #[test]
    fn distance_uses_effective_rssi() {
        let mut config = ScanConfig::new();
        config.smoothing_window = 2;
        let mut reg = DeviceRegistry::new(config);

        reg.ingest(&adv(PUBLIC, -59, 0).with_tx_power(-59));
        reg.ingest(&adv(PUBLIC, -79, 1).with_tx_power(-59));
        // mean -69 → 10^(10/20)
        let d = reg.device(&PUBLIC).unwrap().distance_m.unwrap();
        assert!((d - 3.162).abs() < 0.01, "got {d}");
    }

    #[test]
    fn identity_mode_non_rpa_is_not_applicable() {
        let key = IdentityKey::new([0; 16]);
        let config = ScanConfig::new().with_mode(ScanMode::IdentityResolution(key));
        let mut reg = DeviceRegistry::new(config);

        let events = accepted(reg.ingest(&adv(PUBLIC, -60, 0)));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::DeviceUpdated { .. }));
        assert_eq!(reg.device(&PUBLIC).unwrap().resolution, Some(Resolution::NotApplicable));
        assert_eq!(reg.statistics(Duration::ZERO).identity_matches, 0);
    }

    #[test]
    fn identity_mode_match_emits_before_update() {
        let config = ScanConfig::new().with_mode(ScanMode::IdentityResolution(key()));
        let mut reg = DeviceRegistry::new(config);
        let rpa: Address = "70:81:94:0D:FB:AA".parse().unwrap();

        let events = accepted(reg.ingest(&adv(rpa, -60, 0)));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::IdentityMatched(d) if d.address == rpa));
        assert!(matches!(events[1], SessionEvent::DeviceUpdated { .. }));

        reg.ingest(&adv(rpa, -61, 1));
        let stats = reg.statistics(Duration::ZERO);
        assert_eq!(stats.identity_matches, 2);
        assert_eq!(stats.resolved_addresses, 1);
        assert_eq!(stats.private_addresses, 1);
        assert_eq!(reg.resolved_addresses().get(&rpa), Some(&2));
        assert_eq!(reg.device(&rpa).unwrap().resolution, Some(Resolution::Resolved));
    }

    #[test]
    fn identity_mode_unrelated_rpa_is_not_resolved() {
        let config = ScanConfig::new().with_mode(ScanMode::IdentityResolution(key()));
        let mut reg = DeviceRegistry::new(config);
        let rpa = Address::from_prand(&IdentityKey::new([7; 16]), [1, 2, 3]);

        let events = accepted(reg.ingest(&adv(rpa, -60, 0)));
        assert_eq!(events.len(), 1);
        assert_eq!(reg.device(&rpa).unwrap().resolution, Some(Resolution::NotResolved));
    }

    #[test]
    fn target_mode_filters_and_announces() {
        let config = ScanConfig::new().with_mode(ScanMode::Target(TargetPattern::new("00:1b:d8")));
        let mut reg = DeviceRegistry::new(config);

        assert_eq!(reg.ingest(&adv(OTHER, -40, 0)), Admission::Rejected(Rejection::NotTarget));
        assert!(reg.device(&OTHER).is_none());

        let events = accepted(reg.ingest(&adv(PUBLIC, -40, 1)));
        assert!(matches!(&events[0], SessionEvent::TargetFound(d) if d.address == PUBLIC));
        assert!(matches!(events[1], SessionEvent::DeviceUpdated { .. }));

        let stats = reg.statistics(Duration::ZERO);
        // Non-matching advertisements still count as detections
        assert_eq!(stats.total_detections, 2);
        assert_eq!(stats.unique_devices, 1);
    }

    #[test]
    fn proximity_alert_at_or_under_threshold() {
        let mut config = ScanConfig::new();
        config.alert_within_m = Some(1.0);
        let mut reg = DeviceRegistry::new(config);

        let events = accepted(reg.ingest(&adv(PUBLIC, -59, 0).with_tx_power(-59)));
        assert_eq!(events.len(), 2);
        match &events[1] {
            SessionEvent::ProximityAlert { device, distance_m } => {
                assert_eq!(device.address, PUBLIC);
                assert!((distance_m - 1.0).abs() < 1e-9);
            }
            other => panic!("expected proximity alert, got {other:?}"),
        }

        let events = accepted(reg.ingest(&adv(PUBLIC, -80, 1).with_tx_power(-59)));
        assert_eq!(events.len(), 1);

        // No TX power means no distance and no alert
        let events = accepted(reg.ingest(&adv(PUBLIC, -30, 2)));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn statistics_count_unique_and_private() {
        let mut reg = DeviceRegistry::new(ScanConfig::new());
        let rpa = Address::from_prand(&key(), [9, 9, 9]);
        reg.ingest(&adv(PUBLIC, -60, 0));
        reg.ingest(&adv(rpa, -60, 0));
        reg.ingest(&adv(rpa, -60, 1));

        let stats = reg.statistics(Duration::from_secs(3));
        assert_eq!(stats.total_detections, 3);
        assert_eq!(stats.unique_devices, 2);
        assert_eq!(stats.private_addresses, 1);
        assert_eq!(stats.elapsed, Duration::from_secs(3));
        assert_eq!(reg.devices().len(), 2);
        assert_eq!(reg.devices()[0].address, PUBLIC);
    }
}
