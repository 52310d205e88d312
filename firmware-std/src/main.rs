//! RPAHound ESP-IDF std firmware
//!
//! Thread-based scanner using FreeRTOS threads and std::sync::mpsc
//! channels. NimBLE (via esp32-nimble) both scans for advertisements and
//! serves the GATT service companions connect to. Session events are
//! streamed as NDJSON over serial and BLE notifications; host commands
//! arrive over the GATT RX characteristic.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rpahound::address::Address;
use rpahound::comm::{self, CommandAction, LineReader};
use rpahound::protocol::{HostCommand, MsgBuffer, VERSION};
use rpahound::scanner::AdvParser;
use rpahound::session::{Radio, ReportHandle};
use rpahound::{board, ScanConfig, ScanFailure, ScanPreference, ScanSession, SessionEvent};

use esp_idf_svc::hal::task::block_on;

use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAdvertisementData, BLEDevice, BLEScan, NimbleProperties};

// ── Shared state ─────────────────────────────────────────────────────

static BLE_CLIENTS: AtomicU8 = AtomicU8::new(0);

/// Configuration applied on the next `start` command. Boots scanning
/// continuously in discover mode.
static PENDING_CONFIG: Mutex<ScanConfig> = Mutex::new(ScanConfig::with_timeout(None));

/// Boot time, captured once in main, used for uptime and timestamps.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn uptime_secs() -> u32 {
    lock(&BOOT_INSTANT).map(|boot| boot.elapsed().as_secs() as u32).unwrap_or(0)
}

fn uptime_millis() -> u64 {
    lock(&BOOT_INSTANT).map(|boot| boot.elapsed().as_millis() as u64).unwrap_or(0)
}

// ── NimBLE radio ─────────────────────────────────────────────────────

/// Runs NimBLE scan rounds on a dedicated thread while a session scans.
struct NimbleRadio {
    /// Cleared to end the current scan thread
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl NimbleRadio {
    const fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }
}

impl Radio for NimbleRadio {
    // The controller is brought up in main before any session exists
    fn is_enabled(&self) -> bool {
        true
    }

    fn start_scan(
        &self,
        preference: ScanPreference,
        reports: ReportHandle,
    ) -> Result<(), ScanFailure> {
        let mut running = lock(&self.running);
        // A scan thread that died on its own has already cleared its flag
        if running.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(ScanFailure::AlreadyStarted);
        }

        let flag = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&flag);
        thread::Builder::new()
            .name("blescan".into())
            .stack_size(4096)
            .spawn(move || ble_scan_thread(preference, reports, thread_flag))
            .map_err(|e| {
                log::error!("BLE scan thread spawn failed: {}", e);
                ScanFailure::InternalError
            })?;

        *running = Some(flag);
        Ok(())
    }

    fn stop_scan(&self) {
        if let Some(flag) = lock(&self.running).take() {
            flag.store(false, Ordering::Relaxed);
        }
    }
}

fn ble_scan_thread(preference: ScanPreference, reports: ReportHandle, running: Arc<AtomicBool>) {
    log::info!("BLE scan thread started ({:?})", preference);

    let ble_device = BLEDevice::take();
    let mut scan = BLEScan::new();
    match preference {
        ScanPreference::Active => scan.active_scan(true).interval(100).window(99),
        ScanPreference::Passive => scan.active_scan(false).interval(160).window(80),
    };

    // One-second rounds so a stop request is noticed quickly
    while running.load(Ordering::Relaxed) {
        let round = block_on(scan.start(ble_device, 1000, |device, data| {
            if !running.load(Ordering::Relaxed) {
                return Some(());
            }
            let address = Address::new(device.addr().as_be_bytes());
            let event = AdvParser::parse(address, device.rssi(), data.payload(), uptime_millis());
            reports.deliver(event);
            None
        }));

        if let Err(e) = round {
            log::error!("BLE scan failed: {:?}", e);
            running.store(false, Ordering::Relaxed);
            reports.fail(ScanFailure::InternalError);
            break;
        }
    }

    log::info!("BLE scan thread stopped");
}

// ── Main ─────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    *lock(&BOOT_INSTANT) = Some(Instant::now());

    log::info!("RPAHound v{} starting on {} ({})", VERSION, board::BOARD_NAME, board::CHIP);

    // ── Channels ─────────────────────────────────────────────────────

    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    let (ble_output_tx, ble_output_rx) = mpsc::sync_channel::<MsgBuffer>(4);
    let (cmd_tx, cmd_rx) = mpsc::sync_channel::<HostCommand>(4);

    // ── Session ──────────────────────────────────────────────────────

    let sink_tx = output_tx.clone();
    let session = Arc::new(ScanSession::new(NimbleRadio::new(), move |event: SessionEvent| {
        // Called under the session lock: never block here
        if let Some(buf) = comm::encode_event(&event) {
            let _ = sink_tx.try_send(buf);
        }
    }));

    // ── Output thread ────────────────────────────────────────────────

    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || output_thread(output_rx, ble_output_tx))?;
    log::info!("Output thread spawned");

    // ── Command thread ───────────────────────────────────────────────

    let cmd_session = Arc::clone(&session);
    let cmd_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("command".into())
        .stack_size(4096)
        .spawn(move || command_thread(cmd_rx, &cmd_session, cmd_output_tx))?;
    log::info!("Command thread spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_session = Arc::clone(&session);
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || status_thread(&status_session, output_tx))?;
    log::info!("Status thread spawned");

    // ── Start scanning right away ────────────────────────────────────

    let config = lock(&PENDING_CONFIG).clone();
    if let Err(e) = session.start(config) {
        log::error!("Initial scan start failed: {}", e);
    }

    ble_main(cmd_tx, ble_output_rx)
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>, ble_output_tx: SyncSender<MsgBuffer>) {
    log::info!("Output thread started");

    while let Ok(msg) = output_rx.recv() {
        let _ = ble_output_tx.try_send(msg.clone());

        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn send_status(session: &ScanSession, output_tx: &SyncSender<MsgBuffer>) {
    let status = comm::encode_status(
        &session.state(),
        &lock(&PENDING_CONFIG),
        session.devices().len(),
        uptime_secs(),
        board::BOARD_NAME,
    );
    if let Some(buf) = status {
        let _ = output_tx.try_send(buf);
    }
}

fn status_thread(session: &ScanSession, output_tx: SyncSender<MsgBuffer>) {
    loop {
        thread::sleep(Duration::from_secs(30));
        send_status(session, &output_tx);
    }
}

// ── Command thread ───────────────────────────────────────────────────

fn command_thread(
    cmd_rx: mpsc::Receiver<HostCommand>,
    session: &ScanSession,
    output_tx: SyncSender<MsgBuffer>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        let action = {
            let mut config = lock(&PENDING_CONFIG);
            comm::handle_command(cmd, &mut config)
        };

        match action {
            Ok(CommandAction::Start) => {
                let config = lock(&PENDING_CONFIG).clone();
                // Failures are also published as a state event
                if let Err(e) = session.start(config) {
                    log::warn!("Start rejected: {}", e);
                }
            }
            Ok(CommandAction::Stop) => session.stop(),
            Ok(CommandAction::ReportStatus) => send_status(session, &output_tx),
            Ok(CommandAction::Reconfigured) => {}
            Err(e) => log::warn!("Command rejected: {}", e),
        }
    }
}

// ── BLE (NimBLE) GATT server ─────────────────────────────────────────

fn ble_main(
    cmd_tx: SyncSender<HostCommand>,
    ble_output_rx: mpsc::Receiver<MsgBuffer>,
) -> anyhow::Result<()> {
    let ble_device = BLEDevice::take();
    let server = ble_device.get_server();

    // Track connections; NimBLE auto-restarts advertising on disconnect
    server.on_connect(|_server, desc| {
        log::info!("BLE client connected: {}", desc.address());
        BLE_CLIENTS.fetch_add(1, Ordering::Relaxed);
    });
    server.on_disconnect(|desc, _reason| {
        log::info!("BLE client disconnected: {}", desc.address());
        BLE_CLIENTS.fetch_sub(1, Ordering::Relaxed);
    });

    let uuid = |s: &str| {
        BleUuid::from_uuid128_string(s).map_err(|e| anyhow::anyhow!("invalid UUID {s}: {e:?}"))
    };
    let service_uuid = uuid(comm::ble_uuids::SERVICE)?;
    let tx_uuid = uuid(comm::ble_uuids::TX_CHAR)?;
    let rx_uuid = uuid(comm::ble_uuids::RX_CHAR)?;

    let service = server.create_service(service_uuid);
    let tx_char = service.lock().create_characteristic(tx_uuid, NimbleProperties::NOTIFY);
    let rx_char = service.lock().create_characteristic(rx_uuid, NimbleProperties::WRITE);

    // RX write handler: accumulate bytes into NDJSON command lines
    rx_char.lock().on_write(move |args| {
        thread_local! {
            static LINE_READER: std::cell::RefCell<LineReader> =
                const { std::cell::RefCell::new(LineReader::new()) };
        }
        LINE_READER.with(|lr| {
            let mut lr = lr.borrow_mut();
            for &byte in args.recv_data() {
                if let Some(line) = lr.feed(byte) {
                    match comm::parse_command(line) {
                        Some(cmd) => {
                            let _ = cmd_tx.try_send(cmd);
                        }
                        None => {
                            log::warn!("Unrecognized command: {}", String::from_utf8_lossy(line))
                        }
                    }
                }
            }
        });
    });

    let mut adv_data = BLEAdvertisementData::new();
    adv_data.name(comm::BLE_ADV_NAME).add_service_uuid(service_uuid);
    ble_device
        .get_advertising()
        .lock()
        .set_data(&mut adv_data)
        .map_err(|e| anyhow::anyhow!("BLE advertising data failed: {e:?}"))?;
    ble_device
        .get_advertising()
        .lock()
        .start()
        .map_err(|e| anyhow::anyhow!("BLE advertising start failed: {e:?}"))?;
    log::info!("BLE advertising as '{}'", comm::BLE_ADV_NAME);

    // TX notify loop: chunk each NDJSON line into notification-sized pieces
    loop {
        match ble_output_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(msg) => {
                if BLE_CLIENTS.load(Ordering::Relaxed) == 0 {
                    continue;
                }
                for chunk in msg.chunks(comm::BLE_MAX_NOTIFY) {
                    let mut padded = [b'\n'; comm::BLE_MAX_NOTIFY];
                    padded[..chunk.len()].copy_from_slice(chunk);
                    tx_char.lock().set_value(&padded).notify();
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    anyhow::bail!("BLE output channel disconnected")
}
