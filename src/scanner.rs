/// Advertisement events and raw AD payload parsing.
///
/// Radios hand the session one [`AdvertisementEvent`] per received
/// advertising report. Radios that only expose the raw payload (NimBLE on
/// ESP-IDF) build events with [`AdvParser`].
use std::collections::BTreeMap;

use crate::address::Address;

/// One received advertisement. Never modified after capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    pub address: Address,
    /// Received signal strength in dBm. 0 means the radio did not know.
    pub rssi: i8,
    /// Advertised TX power level (reference power at 1 m), if present
    pub tx_power: Option<i8>,
    /// Shortened or complete local name
    pub name: Option<String>,
    /// Manufacturer specific data, keyed by company ID
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Service UUIDs in canonical 128-bit string form
    pub service_uuids: Vec<String>,
    /// Capture time in milliseconds
    pub timestamp_ms: u64,
}

impl AdvertisementEvent {
    /// An event with no metadata.
    pub fn new(address: Address, rssi: i8, timestamp_ms: u64) -> Self {
        Self {
            address,
            rssi,
            tx_power: None,
            name: None,
            manufacturer_data: BTreeMap::new(),
            service_uuids: Vec::new(),
            timestamp_ms,
        }
    }

    pub fn with_tx_power(mut self, tx_power: i8) -> Self {
        self.tx_power = Some(tx_power);
        self
    }

    /// First manufacturer company ID, if any
    pub fn company_id(&self) -> Option<u16> {
        self.manufacturer_data.keys().next().copied()
    }
}

/// Bluetooth base UUID suffix for 16/32-bit short UUIDs
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Parse advertisement data (AD structures) into an [`AdvertisementEvent`].
///
/// AD structure format: [length] [type] [data...]
/// Types we care about:
///   0x02/0x03 = Incomplete/Complete list of 16-bit service UUIDs
///   0x04/0x05 = Incomplete/Complete list of 32-bit service UUIDs
///   0x06/0x07 = Incomplete/Complete list of 128-bit service UUIDs
///   0x08/0x09 = Shortened/Complete local name
///   0x0A      = TX power level (signed dBm)
///   0xFF      = Manufacturer specific data (first 2 bytes = company ID, little-endian)
pub struct AdvParser;

impl AdvParser {
    /// `address` is in display order (most significant octet first).
    pub fn parse(
        address: Address,
        rssi: i8,
        ad_data: &[u8],
        timestamp_ms: u64,
    ) -> AdvertisementEvent {
        let mut event = AdvertisementEvent::new(address, rssi, timestamp_ms);

        let mut pos = 0;
        while pos < ad_data.len() {
            let len = ad_data[pos] as usize;
            if len == 0 || pos + 1 + len > ad_data.len() {
                break;
            }

            let ad_type = ad_data[pos + 1];
            let data = &ad_data[pos + 2..pos + 1 + len];

            match ad_type {
                0x02 | 0x03 => {
                    for chunk in data.chunks_exact(2) {
                        let uuid = u16::from_le_bytes([chunk[0], chunk[1]]);
                        event.service_uuids.push(format!("0000{uuid:04x}{BASE_UUID_SUFFIX}"));
                    }
                }
                0x04 | 0x05 => {
                    for chunk in data.chunks_exact(4) {
                        let uuid = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                        event.service_uuids.push(format!("{uuid:08x}{BASE_UUID_SUFFIX}"));
                    }
                }
                0x06 | 0x07 => {
                    for chunk in data.chunks_exact(16) {
                        event.service_uuids.push(format_uuid128(chunk));
                    }
                }
                0x08 | 0x09 => {
                    if let Ok(name) = core::str::from_utf8(data) {
                        event.name = Some(name.to_owned());
                    }
                }
                0x0A => {
                    if let Some(&level) = data.first() {
                        event.tx_power = Some(level as i8);
                    }
                }
                0xFF => {
                    if data.len() >= 2 {
                        let company = u16::from_le_bytes([data[0], data[1]]);
                        event.manufacturer_data.insert(company, data[2..].to_vec());
                    }
                }
                _ => {}
            }

            pos += 1 + len;
        }

        event
    }
}

/// 128-bit UUIDs are little-endian on air.
fn format_uuid128(le: &[u8]) -> String {
    let mut be = [0u8; 16];
    for (dst, src) in be.iter_mut().zip(le.iter().rev()) {
        *dst = *src;
    }
    let h = hex::encode(be);
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}
