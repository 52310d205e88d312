//! RPAHound library: BLE advertisement aggregation and private address
//! resolution.
//!
//! Turns a raw stream of advertisement reports into a deduplicated device
//! registry. Each device carries smoothed signal strength, an estimated
//! distance, and, when an Identity Resolving Key is configured, whether its
//! Resolvable Private Address was generated from that key. All session
//! logic is platform independent and testable on any host with
//! `cargo test`. Platform binaries (the host CLI in `main.rs`, the ESP-IDF
//! firmware in `firmware-std/`) only provide a [`session::Radio`] and an
//! output sink.
//!
//! Layers, bottom up:
//! - `address`, `distance`, `smoother`: pure functions and small state
//! - `scanner`, `filter`, `config`, `registry`: advertisement parsing and
//!   the device registry
//! - `session`: lifecycle, timeout, event publication
//! - `protocol`, `comm`, `replay`: NDJSON wire format and the replay radio

pub mod address;
pub mod board;
pub mod comm;
pub mod config;
pub mod defaults;
pub mod distance;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod registry;
pub mod replay;
pub mod scanner;
pub mod session;
pub mod smoother;

pub use address::{Address, IdentityKey};
pub use config::{ScanConfig, ScanMode, ScanPreference, TargetPattern};
pub use distance::PathLoss;
pub use error::{Error, Result, ScanFailure};
pub use registry::{DeviceRecord, Resolution, ScanStatistics};
pub use scanner::AdvertisementEvent;
pub use session::{EventSink, Radio, ScanSession, ScanState, SessionEvent};
