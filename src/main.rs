//! RPAHound host CLI
//!
//! Replays recorded BLE advertisements through a scan session and streams
//! the session's events as NDJSON on stdout. Logs go to stderr, so stdout
//! can be piped straight into a companion tool.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use rpahound::address::{self, Address};
use rpahound::distance::format_distance;
use rpahound::replay::ReplayRadio;
use rpahound::session::ChannelSink;
use rpahound::{board, comm, defaults};
use rpahound::{PathLoss, ScanConfig, ScanMode, ScanPreference, ScanSession, SessionEvent};

#[derive(Parser)]
#[command(
    name = "rpahound",
    version,
    about = "BLE device scanner with IRK-based address resolution"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay recorded advertisements and report devices as NDJSON
    Scan(ScanArgs),
    /// Check addresses against an IRK
    Resolve {
        /// 32 hex digit Identity Resolving Key
        #[arg(long)]
        key: String,
        /// Addresses in AA:BB:CC:DD:EE:FF form
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Validate an IRK
    CheckKey { key: String },
    /// Explain what an IRK is and where to find one
    KeyHelp,
}

#[derive(Args)]
struct ScanArgs {
    /// Resolve private addresses against this IRK
    #[arg(long, conflicts_with = "target")]
    key: Option<String>,
    /// Only report addresses containing this fragment
    #[arg(long)]
    target: Option<String>,
    /// Drop devices weaker than this (dBm)
    #[arg(long, allow_negative_numbers = true)]
    min_rssi: Option<i8>,
    /// RSSI smoothing window, 1 disables smoothing
    #[arg(long, default_value_t = defaults::SMOOTHING_WINDOW)]
    window: usize,
    /// Path loss model: free-space, outdoor, indoor
    #[arg(long, default_value_t = PathLoss::FreeSpace)]
    environment: PathLoss,
    /// Emit proximity alerts for devices closer than this (meters)
    #[arg(long)]
    alert_within: Option<f64>,
    /// Ask the radio for low latency scanning
    #[arg(long)]
    active: bool,
    /// Stop after this many seconds, 0 runs until the input ends
    #[arg(long, default_value_t = defaults::SCAN_TIMEOUT.as_secs())]
    timeout: u64,
    /// NDJSON advertisement file, stdin if omitted
    #[arg(long)]
    input: Option<PathBuf>,
    /// Print a device table to stderr when the scan ends
    #[arg(long)]
    summary: bool,
}

impl ScanArgs {
    fn config(&self) -> rpahound::Result<ScanConfig> {
        let config = ScanConfig {
            mode: ScanMode::from_options(self.target.as_deref(), self.key.as_deref())?,
            min_rssi: self.min_rssi,
            smoothing_window: self.window,
            environment: self.environment,
            alert_within_m: self.alert_within,
            preference: if self.active {
                ScanPreference::Active
            } else {
                ScanPreference::Passive
            },
            timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    match Cli::parse().command {
        Command::Scan(args) => scan(args),
        Command::Resolve { key, addresses } => resolve(&key, &addresses),
        Command::CheckKey { key } => match address::validate_key(&key) {
            None => {
                println!("valid");
                Ok(())
            }
            Some(msg) => anyhow::bail!(msg),
        },
        Command::KeyHelp => {
            print!("{}", defaults::KEY_HELP);
            Ok(())
        }
    }
}

fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let boot = Instant::now();
    let config = args.config()?;

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    log::info!("RPAHound v{} starting on {}", rpahound::protocol::VERSION, board::BOARD_NAME);

    let radio = Arc::new(ReplayRadio::new());
    let (sink, events) = ChannelSink::new();
    let session = ScanSession::new(Arc::clone(&radio), sink);

    let output = thread::Builder::new()
        .name("output".into())
        .spawn(move || output_thread(events))?;

    session.start(config)?;
    let replayed = radio.replay(input)?;
    session.stop();
    log::info!("Replayed {} advertisements, skipped {}", replayed.delivered, replayed.skipped);

    if args.summary {
        print_summary(&session);
    }
    let status = comm::encode_status(
        &session.state(),
        &session.config(),
        session.devices().len(),
        boot.elapsed().as_secs() as u32,
        board::BOARD_NAME,
    );

    // Dropping the session closes the event channel and ends the output thread
    drop(session);
    output
        .join()
        .map_err(|_| anyhow::anyhow!("output thread panicked"))??;

    if let Some(status) = status {
        io::stdout().write_all(&status)?;
    }
    Ok(())
}

fn output_thread(events: mpsc::Receiver<SessionEvent>) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    for event in events {
        match comm::encode_event(&event) {
            Some(line) => stdout.write_all(&line)?,
            None => log::warn!("Dropping oversized message for {:?}", event),
        }
        stdout.flush()?;
    }
    Ok(())
}

fn print_summary(session: &ScanSession) {
    let mut devices = session.devices();
    devices.sort_by_key(|d| core::cmp::Reverse(d.effective_rssi()));

    let stats = session.statistics();
    eprintln!(
        "{} detections, {} devices ({} RPA), {} IRK matches in {:.1}s",
        stats.total_detections,
        stats.unique_devices,
        stats.private_addresses,
        stats.identity_matches,
        stats.elapsed.as_secs_f64(),
    );
    eprintln!(
        "{:<17}  {:<13}  {:>5}  {:>8}  {:>5}  {}",
        "ADDRESS", "TYPE", "RSSI", "DIST", "SEEN", "IRK"
    );
    for d in &devices {
        eprintln!(
            "{:<17}  {:<13}  {:>5}  {:>8}  {:>5}  {}",
            d.address,
            d.address_kind(),
            d.effective_rssi(),
            format_distance(d.distance_m),
            d.detection_count,
            d.resolution.map_or("", |r| r.as_str()),
        );
    }

    let resolved = session.resolved_addresses();
    if !resolved.is_empty() {
        eprintln!("Resolved addresses:");
        for (address, count) in resolved {
            eprintln!("  {address}  x{count}");
        }
    }
}

fn resolve(key: &str, addresses: &[String]) -> anyhow::Result<()> {
    let key = address::parse_key(key)?;
    for text in addresses {
        let address: Address = text.parse()?;
        let verdict = if !address.is_private_resolvable() {
            "not an RPA"
        } else if address::resolve(&key, &address) {
            "resolved"
        } else {
            "not resolved"
        };
        println!("{address}  {verdict}");
    }
    Ok(())
}
