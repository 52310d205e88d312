/// Communication layer: NDJSON encoding of session events and parsing of
/// host commands.
///
/// Transports (serial, BLE GATT, stdout) live in the binaries; they move
/// [`MsgBuffer`]s out and feed received bytes through a [`LineReader`].
use core::time::Duration;

use crate::address::parse_key;
use crate::config::{ScanConfig, ScanMode, TargetPattern};
use crate::defaults::MAX_SMOOTHING_WINDOW;
use crate::error::{Error, Result};
use crate::protocol::{
    truncated, HostCommand, MsgBuffer, NameString, RawCommand, ReasonString, SessionMessage,
    UuidString, MAX_MSG_LEN,
};
use crate::registry::DeviceRecord;
use crate::session::{ScanState, SessionEvent};

/// BLE GATT service UUIDs for RPAHound.
pub mod ble_uuids {
    /// RPAHound primary service UUID
    pub const SERVICE: &str = "52a70001-6b1d-4f0e-9c3a-2d8e5f1b7a40";
    /// TX characteristic: session events, notify
    pub const TX_CHAR: &str = "52a70002-6b1d-4f0e-9c3a-2d8e5f1b7a40";
    /// RX characteristic: host commands, write
    pub const RX_CHAR: &str = "52a70003-6b1d-4f0e-9c3a-2d8e5f1b7a40";
}

/// BLE advertising name
pub const BLE_ADV_NAME: &str = "RPAHound";

/// Maximum BLE notification payload (MTU-3)
pub const BLE_MAX_NOTIFY: usize = 20;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a SessionMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written including the trailing newline, or
/// None if the line does not fit.
pub fn serialize_message(msg: &SessionMessage, buf: &mut [u8]) -> Option<usize> {
    let len = serde_json_core::to_slice(msg, buf).ok()?;
    // The NDJSON newline must fit too
    *buf.get_mut(len)? = b'\n';
    Some(len + 1)
}

/// Serialize into a fresh [`MsgBuffer`] sized to the message.
pub fn encode_message(msg: &SessionMessage) -> Option<MsgBuffer> {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok()?;
    let len = serialize_message(msg, &mut buf)?;
    buf.truncate(len);
    Some(buf)
}

fn centimetres(meters: f64) -> u32 {
    (meters * 100.0).round() as u32
}

fn device_name(device: &DeviceRecord) -> Option<NameString> {
    device.name.as_deref().map(truncated)
}

/// Encode one session event as an NDJSON line.
///
/// Returns None only if the message does not fit in [`MAX_MSG_LEN`].
pub fn encode_event(event: &SessionEvent) -> Option<MsgBuffer> {
    match event {
        SessionEvent::DeviceUpdated { device, is_update } => {
            let mac = device.address.to_mac_string();
            let name = device_name(device);
            let uuid: Option<UuidString> = device.service_uuids.first().map(|u| truncated(u));
            encode_message(&SessionMessage::Device {
                mac: &mac,
                name: name.as_ref(),
                rssi: device.rssi,
                smoothed: device.smoothed_rssi,
                tx: device.tx_power,
                dist_cm: device.distance_m.map(centimetres),
                mfr: device.manufacturer_data.keys().next().copied(),
                uuid: uuid.as_ref(),
                count: device.detection_count,
                addr: if device.private_resolvable { "rpa" } else { "public" },
                irk: device.resolution.map(|r| r.as_str()),
                update: *is_update,
                first_ts: device.first_seen_ms,
                ts: device.last_seen_ms,
            })
        }
        SessionEvent::IdentityMatched(device) => {
            let mac = device.address.to_mac_string();
            let name = device_name(device);
            encode_message(&SessionMessage::IrkMatch {
                mac: &mac,
                name: name.as_ref(),
                rssi: device.effective_rssi(),
                dist_cm: device.distance_m.map(centimetres),
                count: device.detection_count,
                ts: device.last_seen_ms,
            })
        }
        SessionEvent::TargetFound(device) => {
            let mac = device.address.to_mac_string();
            let name = device_name(device);
            encode_message(&SessionMessage::Target {
                mac: &mac,
                name: name.as_ref(),
                rssi: device.effective_rssi(),
                dist_cm: device.distance_m.map(centimetres),
                ts: device.last_seen_ms,
            })
        }
        SessionEvent::ProximityAlert { device, distance_m } => {
            let mac = device.address.to_mac_string();
            encode_message(&SessionMessage::Proximity {
                mac: &mac,
                rssi: device.effective_rssi(),
                dist_cm: centimetres(*distance_m),
                ts: device.last_seen_ms,
            })
        }
        SessionEvent::StateChanged(state) => {
            let reason: Option<ReasonString> = state.message().map(truncated);
            encode_message(&SessionMessage::State {
                state: state.as_str(),
                msg: reason.as_ref(),
            })
        }
        SessionEvent::StatisticsUpdated(stats) => encode_message(&SessionMessage::Stats {
            total: stats.total_detections,
            unique: stats.unique_devices,
            irk_matches: stats.identity_matches,
            resolved: stats.resolved_addresses,
            rpa: stats.private_addresses,
            elapsed_ms: stats.elapsed.as_millis() as u64,
        }),
    }
}

/// Encode a status report.
pub fn encode_status(
    state: &ScanState,
    config: &ScanConfig,
    devices: usize,
    uptime: u32,
    board: &'static str,
) -> Option<MsgBuffer> {
    encode_message(&SessionMessage::Status {
        scanning: *state == ScanState::Scanning,
        state: state.as_str(),
        mode: config.mode.as_str(),
        devices,
        min_rssi: config.min_rssi,
        window: config.smoothing_window,
        timeout: config.timeout.map_or(0, |t| t.as_secs()),
        uptime,
        board,
        version: crate::protocol::VERSION,
    })
}

// ── Host commands ──────────────────────────────────────────────────────

/// Deserialize a HostCommand from a JSON byte slice.
///
/// Uses the flat [`RawCommand`] wire struct, since `serde_json_core` cannot
/// deserialize internally tagged enums.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed).ok()?;
    match raw.cmd.as_str() {
        "start" => Some(HostCommand::Start),
        "stop" => Some(HostCommand::Stop),
        "status" => Some(HostCommand::GetStatus),
        "set_rssi" => Some(HostCommand::SetRssi { min_rssi: raw.min_rssi }),
        "set_irk" => raw.key.map(|key| HostCommand::SetKey { key }),
        "set_target" => raw.target.map(|target| HostCommand::SetTarget { target }),
        "discover" => Some(HostCommand::Discover),
        "set_window" => raw.window.map(|window| HostCommand::SetWindow { window }),
        "set_timeout" => raw.secs.map(|secs| HostCommand::SetTimeout { secs }),
        _ => None,
    }
}

/// What the caller should do with the session after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Start,
    Stop,
    ReportStatus,
    /// Configuration changed; applies from the next start
    Reconfigured,
}

/// Apply a host command to the pending configuration.
///
/// Invalid values are rejected and leave `config` untouched.
pub fn handle_command(cmd: HostCommand, config: &mut ScanConfig) -> Result<CommandAction> {
    match cmd {
        HostCommand::Start => Ok(CommandAction::Start),
        HostCommand::Stop => Ok(CommandAction::Stop),
        HostCommand::GetStatus => Ok(CommandAction::ReportStatus),
        HostCommand::SetRssi { min_rssi } => {
            config.min_rssi = min_rssi;
            match min_rssi {
                Some(min) => log::info!("RSSI threshold set to {}", min),
                None => log::info!("RSSI threshold cleared"),
            }
            Ok(CommandAction::Reconfigured)
        }
        HostCommand::SetKey { key } => {
            config.mode = ScanMode::IdentityResolution(parse_key(&key)?);
            log::info!("IRK resolution mode enabled");
            Ok(CommandAction::Reconfigured)
        }
        HostCommand::SetTarget { target } => {
            if target.trim().is_empty() {
                return Err(Error::InvalidCommand("empty target"));
            }
            let pattern = TargetPattern::new(&target);
            log::info!("Target set to {}", pattern.as_str());
            config.mode = ScanMode::Target(pattern);
            Ok(CommandAction::Reconfigured)
        }
        HostCommand::Discover => {
            config.mode = ScanMode::DiscoverAll;
            log::info!("Discover mode enabled");
            Ok(CommandAction::Reconfigured)
        }
        HostCommand::SetWindow { window } => {
            if !(1..=MAX_SMOOTHING_WINDOW).contains(&window) {
                return Err(Error::InvalidSmoothingWindow);
            }
            config.smoothing_window = window;
            log::info!("Smoothing window set to {}", window);
            Ok(CommandAction::Reconfigured)
        }
        HostCommand::SetTimeout { secs } => {
            config.timeout = (secs > 0).then(|| Duration::from_secs(u64::from(secs)));
            log::info!("Scan timeout set to {:?}", config.timeout);
            Ok(CommandAction::Reconfigured)
        }
    }
}

// ── NDJSON line reader ─────────────────────────────────────────────────

/// NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected. An over-long line is dropped whole.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let complete = self.pos > 0 && !self.overflowed;
            let len = self.pos;
            self.pos = 0;
            self.overflowed = false;
            complete.then(|| &self.buf[..len])
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            self.overflowed = true;
            self.pos = 0;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\n' | b'\r' | b'\t') {
        end -= 1;
    }
    &data[..end]
}
