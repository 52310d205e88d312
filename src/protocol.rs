/// JSON message protocol between RPAHound and companion apps.
///
/// All messages are newline-delimited JSON (NDJSON). Outbound messages
/// borrow fixed-capacity `heapless` strings so they serialize without
/// allocating.
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

/// Maximum length for MAC address strings ("AA:BB:CC:DD:EE:FF")
pub type MacString = String<18>;

/// Maximum length for IRK text, room for a `0x` prefix and byte separators
pub type KeyString = String<64>;

/// Maximum length for device name strings
pub type NameString = String<33>;

/// Maximum length for UUID strings
pub type UuidString = String<37>;

/// Maximum length for an error message in a state report
pub type ReasonString = String<64>;

/// Copy `text` into a fixed-capacity string, cutting at the last character
/// that fits.
pub fn truncated<const N: usize>(text: &str) -> String<N> {
    let mut out = String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Messages sent from the scanner to the companion app
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum SessionMessage<'a> {
    /// Device record created or refreshed
    #[serde(rename = "device")]
    Device {
        mac: &'a MacString,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<&'a NameString>,
        rssi: i8,
        /// Windowed mean, present only when smoothing is enabled
        #[serde(skip_serializing_if = "Option::is_none")]
        smoothed: Option<i8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tx: Option<i8>,
        /// Estimated distance in centimetres
        #[serde(skip_serializing_if = "Option::is_none")]
        dist_cm: Option<u32>,
        /// Company ID of the first manufacturer data entry
        #[serde(skip_serializing_if = "Option::is_none")]
        mfr: Option<u16>,
        /// First advertised service UUID
        #[serde(skip_serializing_if = "Option::is_none")]
        uuid: Option<&'a UuidString>,
        count: u32,
        /// "rpa" or "public"
        addr: &'static str,
        /// IRK verdict: "resolved", "not_resolved", "n/a"
        #[serde(skip_serializing_if = "Option::is_none")]
        irk: Option<&'static str>,
        update: bool,
        first_ts: u64,
        ts: u64,
    },
    /// The configured IRK resolved this address
    #[serde(rename = "irk_match")]
    IrkMatch {
        mac: &'a MacString,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<&'a NameString>,
        rssi: i8,
        #[serde(skip_serializing_if = "Option::is_none")]
        dist_cm: Option<u32>,
        count: u32,
        ts: u64,
    },
    /// The configured target address was seen
    #[serde(rename = "target")]
    Target {
        mac: &'a MacString,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<&'a NameString>,
        rssi: i8,
        #[serde(skip_serializing_if = "Option::is_none")]
        dist_cm: Option<u32>,
        ts: u64,
    },
    /// A device came within the alert distance
    #[serde(rename = "proximity")]
    Proximity {
        mac: &'a MacString,
        rssi: i8,
        dist_cm: u32,
        ts: u64,
    },
    /// Scan lifecycle change
    #[serde(rename = "state")]
    State {
        /// "idle", "scanning", "stopping", "error"
        state: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<&'a ReasonString>,
    },
    /// Counters for the current run
    #[serde(rename = "stats")]
    Stats {
        total: u64,
        unique: usize,
        irk_matches: u64,
        resolved: usize,
        rpa: usize,
        elapsed_ms: u64,
    },
    /// Scanner status report
    #[serde(rename = "status")]
    Status {
        scanning: bool,
        state: &'static str,
        /// "discover", "target", "irk"
        mode: &'static str,
        devices: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        min_rssi: Option<i8>,
        window: usize,
        /// Configured timeout in seconds, 0 for none
        timeout: u64,
        /// Uptime in seconds
        uptime: u32,
        /// Board identifier
        board: &'static str,
        version: &'static str,
    },
}

/// Commands sent from the companion app to the scanner.
///
/// Deserialized via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, PartialEq)]
pub enum HostCommand {
    /// Start scanning with the current configuration
    Start,
    /// Stop scanning
    Stop,
    /// Request current status
    GetStatus,
    /// Set or clear the RSSI floor
    SetRssi {
        /// Minimum RSSI (negative dBm value), `None` clears the floor
        min_rssi: Option<i8>,
    },
    /// Switch to IRK resolution mode with a 32-hex-digit key
    SetKey { key: KeyString },
    /// Switch to target mode
    SetTarget { target: MacString },
    /// Back to discovering every device
    Discover,
    /// RSSI smoothing window, 1 disables smoothing
    SetWindow { window: usize },
    /// Automatic stop in seconds, 0 scans until stopped
    SetTimeout { secs: u32 },
}

/// Wire format for host commands: a flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: String<16>,
    #[serde(default)]
    pub min_rssi: Option<i8>,
    #[serde(default)]
    pub key: Option<KeyString>,
    #[serde(default)]
    pub target: Option<MacString>,
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default)]
    pub secs: Option<u32>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(msg: &SessionMessage) -> std::string::String {
        let mut buf = [0u8; MAX_MSG_LEN];
        let len = serde_json_core::to_slice(msg, &mut buf).unwrap();
        core::str::from_utf8(&buf[..len]).unwrap().to_owned()
    }

    // ── SessionMessage serialization ────────────────────────────────

    #[test]
    fn serialize_device_message() {
        let mac = MacString::try_from("70:81:94:0D:FB:AA").unwrap();
        let name = NameString::try_from("Buds Pro").unwrap();
        let msg = SessionMessage::Device {
            mac: &mac,
            name: Some(&name),
            rssi: -62,
            smoothed: Some(-60),
            tx: Some(-59),
            dist_cm: Some(141),
            mfr: Some(0x004C),
            uuid: None,
            count: 3,
            addr: "rpa",
            irk: Some("resolved"),
            update: true,
            first_ts: 1000,
            ts: 4000,
        };
        let json = to_json(&msg);
        assert!(json.starts_with(r#"{"type":"device""#));
        assert!(json.contains(r#""mac":"70:81:94:0D:FB:AA""#));
        assert!(json.contains(r#""name":"Buds Pro""#));
        assert!(json.contains(r#""smoothed":-60"#));
        assert!(json.contains(r#""dist_cm":141"#));
        assert!(json.contains(r#""mfr":76"#));
        assert!(json.contains(r#""irk":"resolved""#));
        assert!(json.contains(r#""update":true"#));
        assert!(!json.contains("uuid"));
    }

    #[test]
    fn device_message_omits_absent_fields() {
        let mac = MacString::try_from("00:11:22:33:44:55").unwrap();
        let msg = SessionMessage::Device {
            mac: &mac,
            name: None,
            rssi: -80,
            smoothed: None,
            tx: None,
            dist_cm: None,
            mfr: None,
            uuid: None,
            count: 1,
            addr: "public",
            irk: None,
            update: false,
            first_ts: 0,
            ts: 0,
        };
        let json = to_json(&msg);
        for field in ["name", "smoothed", "tx", "dist_cm", "mfr", "irk"] {
            assert!(!json.contains(&format!("\"{field}\"")), "{field} in {json}");
        }
    }

    #[test]
    fn serialize_state_with_reason() {
        let reason: ReasonString = truncated("Bluetooth is not enabled");
        let json = to_json(&SessionMessage::State {
            state: "error",
            msg: Some(&reason),
        });
        assert_eq!(json, r#"{"type":"state","state":"error","msg":"Bluetooth is not enabled"}"#);

        let json = to_json(&SessionMessage::State { state: "idle", msg: None });
        assert_eq!(json, r#"{"type":"state","state":"idle"}"#);
    }

    #[test]
    fn serialize_stats_message() {
        let json = to_json(&SessionMessage::Stats {
            total: 120,
            unique: 14,
            irk_matches: 3,
            resolved: 2,
            rpa: 9,
            elapsed_ms: 30_000,
        });
        assert!(json.contains(r#""type":"stats""#));
        assert!(json.contains(r#""total":120"#));
        assert!(json.contains(r#""irk_matches":3"#));
        assert!(json.contains(r#""elapsed_ms":30000"#));
    }

    #[test]
    fn serialize_status_message() {
        let msg = SessionMessage::Status {
            scanning: true,
            state: "scanning",
            mode: "irk",
            devices: 4,
            min_rssi: Some(-80),
            window: 5,
            timeout: 30,
            uptime: 120,
            board: "test_board",
            version: "0.1.0",
        };
        let json = to_json(&msg);
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""scanning":true"#));
        assert!(json.contains(r#""mode":"irk""#));
        assert!(json.contains(r#""min_rssi":-80"#));
        assert!(json.contains(r#""board":"test_board""#));
    }

    #[test]
    fn truncated_stops_at_capacity() {
        let s: String<4> = truncated("abcdef");
        assert_eq!(s.as_str(), "abcd");
        // multi-byte char that would straddle the boundary is dropped
        let s: String<4> = truncated("abcé");
        assert_eq!(s.as_str(), "abc");
    }

    #[test]
    fn host_command_equality() {
        assert_eq!(
            HostCommand::SetRssi { min_rssi: Some(-75) },
            HostCommand::SetRssi { min_rssi: Some(-75) }
        );
        assert_ne!(HostCommand::Start, HostCommand::Stop);
    }

    #[test]
    fn version_is_semver() {
        let parts: heapless::Vec<&str, 4> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION should be semver (major.minor.patch)");
        for part in &parts {
            assert!(part.parse::<u32>().is_ok(), "'{part}' is not a number");
        }
    }
}
