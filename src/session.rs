/// Scan session: start/stop lifecycle, automatic timeout, statistics, and
/// event publication.
///
/// The radio delivers advertisements through a [`ReportHandle`] from any
/// thread. Every delivery locks the session core, folds the advertisement
/// into the [`DeviceRegistry`], and publishes the resulting events to the
/// [`EventSink`] before releasing the lock, so the sink sees events in
/// production order.
///
/// ```text
///   Idle ──start──▶ Scanning ──stop/timeout──▶ Stopping ──▶ Idle
///     │                │
///     └── start fails ─┴── radio fails ──▶ Error
/// ```
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::address::Address;
use crate::config::{ScanConfig, ScanPreference};
use crate::error::{Error, Result, ScanFailure};
use crate::registry::{Admission, DeviceRecord, DeviceRegistry, ScanStatistics};
use crate::scanner::AdvertisementEvent;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Stopping,
    /// Scanning could not start or the radio failed; carries the reason
    Error(String),
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Stopping => "stopping",
            ScanState::Error(_) => "error",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ScanState::Error(msg) => Some(msg.as_str()),
            _ => None,
        }
    }
}

/// Everything a session publishes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A record was created (`is_update == false`) or refreshed
    DeviceUpdated { device: DeviceRecord, is_update: bool },
    /// The configured IRK resolved this device's address
    IdentityMatched(DeviceRecord),
    /// The device matched the configured target address
    TargetFound(DeviceRecord),
    /// The device is estimated within the alert distance
    ProximityAlert { device: DeviceRecord, distance_m: f64 },
    StateChanged(ScanState),
    StatisticsUpdated(ScanStatistics),
}

/// Receiver of session events.
///
/// Called with the session lock held: implementations must not call back
/// into the [`ScanSession`]. Hand events to another thread (see
/// [`ChannelSink`]) if they need to.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn publish(&self, event: SessionEvent) {
        self(event);
    }
}

/// Forwards events over an unbounded mpsc channel.
pub struct ChannelSink(Mutex<mpsc::Sender<SessionEvent>>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self(Mutex::new(tx)), rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: SessionEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = lock(&self.0).send(event);
    }
}

/// Platform radio that produces advertisement reports.
pub trait Radio: Send + Sync {
    /// Whether a scanner exists at all on this platform
    fn is_available(&self) -> bool {
        true
    }

    /// Whether the radio is powered on
    fn is_enabled(&self) -> bool;

    /// Begin scanning and deliver every report through `reports` until
    /// [`Radio::stop_scan`] is called.
    fn start_scan(
        &self,
        preference: ScanPreference,
        reports: ReportHandle,
    ) -> core::result::Result<(), ScanFailure>;

    fn stop_scan(&self);
}

impl<R: Radio + ?Sized> Radio for Arc<R> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }

    fn start_scan(
        &self,
        preference: ScanPreference,
        reports: ReportHandle,
    ) -> core::result::Result<(), ScanFailure> {
        (**self).start_scan(preference, reports)
    }

    fn stop_scan(&self) {
        (**self).stop_scan();
    }
}

/// Entry point for reports from the radio into one scan run.
///
/// Reports delivered while the radio is still starting count toward the
/// run. Reports delivered after the run has stopped are ignored.
#[derive(Clone)]
pub struct ReportHandle {
    shared: Weak<Shared>,
    generation: u64,
}

impl ReportHandle {
    pub fn deliver(&self, event: AdvertisementEvent) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut core = lock(&shared.core);
        if !core.accepts_reports(self.generation) {
            return;
        }

        if let Admission::Accepted(events) = core.registry.ingest(&event) {
            for e in events {
                shared.sink.publish(e);
            }
            let stats = core.statistics();
            shared.sink.publish(SessionEvent::StatisticsUpdated(stats));
        }
    }

    /// Report that the running scan failed. Moves the session to `Error`.
    pub fn fail(&self, failure: ScanFailure) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut core = lock(&shared.core);
        if core.generation == self.generation && core.starting {
            // `start` is still waiting on the radio and reports it
            core.start_failure = Some(failure);
            return;
        }
        if !core.is_current(self.generation) {
            return;
        }
        core.timer = None;
        core.stopped_at = Some(Instant::now());
        shared.enter_error(&mut core, failure.to_string());
    }
}

struct Core {
    state: ScanState,
    registry: DeviceRegistry,
    /// Bumped on every start so stale handles and timers can be told apart
    generation: u64,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    /// Set while `start` waits on the radio
    starting: bool,
    /// Failure reported by the radio before `start_scan` returned
    start_failure: Option<ScanFailure>,
    /// Dropping the sender cancels the timeout thread
    timer: Option<mpsc::Sender<()>>,
}

impl Core {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == ScanState::Scanning
    }

    fn accepts_reports(&self, generation: u64) -> bool {
        self.is_current(generation) || (self.generation == generation && self.starting)
    }

    fn statistics(&self) -> ScanStatistics {
        let elapsed = self
            .started_at
            .map(|start| {
                self.stopped_at
                    .unwrap_or_else(Instant::now)
                    .saturating_duration_since(start)
            })
            .unwrap_or_default();
        self.registry.statistics(elapsed)
    }
}

struct Shared {
    radio: Box<dyn Radio>,
    sink: Box<dyn EventSink>,
    /// Serializes start, stop and reset
    control: Mutex<()>,
    core: Mutex<Core>,
}

impl Shared {
    fn enter_error(&self, core: &mut Core, message: String) {
        log::warn!("Scan error: {}", message);
        core.state = ScanState::Error(message);
        self.sink.publish(SessionEvent::StateChanged(core.state.clone()));
    }

    fn stop(&self, generation: Option<u64>) -> bool {
        let _control = lock(&self.control);
        self.stop_locked(generation)
    }

    /// Caller holds `control`.
    fn stop_locked(&self, generation: Option<u64>) -> bool {
        {
            let mut core = lock(&self.core);
            if core.state != ScanState::Scanning {
                return false;
            }
            if generation.is_some_and(|g| g != core.generation) {
                return false;
            }
            core.state = ScanState::Stopping;
            core.timer = None;
            self.sink.publish(SessionEvent::StateChanged(ScanState::Stopping));
        }

        // Radios may still be delivering; those reports see `Stopping` and
        // are dropped.
        self.radio.stop_scan();

        let mut core = lock(&self.core);
        core.stopped_at = Some(Instant::now());
        core.state = ScanState::Idle;
        let stats = core.statistics();
        log::info!(
            "Scan stopped after {:?}: {} detections, {} devices, {} IRK matches",
            stats.elapsed,
            stats.total_detections,
            stats.unique_devices,
            stats.identity_matches,
        );
        self.sink.publish(SessionEvent::StatisticsUpdated(stats));
        self.sink.publish(SessionEvent::StateChanged(ScanState::Idle));
        true
    }
}

/// One scanner with its device registry.
pub struct ScanSession {
    shared: Arc<Shared>,
}

impl ScanSession {
    pub fn new(radio: impl Radio + 'static, sink: impl EventSink + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                radio: Box::new(radio),
                sink: Box::new(sink),
                control: Mutex::new(()),
                core: Mutex::new(Core {
                    state: ScanState::Idle,
                    registry: DeviceRegistry::new(ScanConfig::new()),
                    generation: 0,
                    started_at: None,
                    stopped_at: None,
                    starting: false,
                    start_failure: None,
                    timer: None,
                }),
            }),
        }
    }

    /// Reset the registry and start scanning with `config`.
    ///
    /// On radio problems the session moves to [`ScanState::Error`] and the
    /// error is returned. Starting while a scan runs is rejected and leaves
    /// the running scan alone.
    pub fn start(&self, config: ScanConfig) -> Result<()> {
        config.validate()?;
        let shared = &self.shared;
        let _control = lock(&shared.control);

        let generation = {
            let mut core = lock(&shared.core);
            if matches!(core.state, ScanState::Scanning | ScanState::Stopping) {
                return Err(Error::AlreadyScanning);
            }
            if !shared.radio.is_available() {
                shared.enter_error(&mut core, Error::RadioUnavailable.to_string());
                return Err(Error::RadioUnavailable);
            }
            if !shared.radio.is_enabled() {
                shared.enter_error(&mut core, Error::RadioDisabled.to_string());
                return Err(Error::RadioDisabled);
            }

            core.registry = DeviceRegistry::new(config.clone());
            core.generation += 1;
            core.started_at = Some(Instant::now());
            core.stopped_at = None;
            core.starting = true;
            core.start_failure = None;
            core.generation
        };

        let reports = ReportHandle {
            shared: Arc::downgrade(shared),
            generation,
        };
        // Not holding the core lock: radios may deliver from inside start_scan
        let started = shared.radio.start_scan(config.preference, reports);

        let mut core = lock(&shared.core);
        core.starting = false;
        let failure = match started {
            Ok(()) => core.start_failure.take(),
            Err(failure) => Some(failure),
        };
        if let Some(failure) = failure {
            if started.is_ok() {
                // Failed through the handle; release the radio outside the lock
                drop(core);
                shared.radio.stop_scan();
                core = lock(&shared.core);
            }
            core.registry = DeviceRegistry::new(config);
            core.stopped_at = Some(Instant::now());
            let err = Error::ScanStartFailed(failure);
            shared.enter_error(&mut core, err.to_string());
            return Err(err);
        }

        core.state = ScanState::Scanning;
        log::info!(
            "Scan started: mode={}, window={}, env={}, timeout={:?}",
            config.mode.as_str(),
            config.smoothing_window,
            config.environment,
            config.timeout,
        );
        shared.sink.publish(SessionEvent::StateChanged(ScanState::Scanning));

        if let Some(timeout) = config.timeout {
            core.timer = spawn_timeout(Arc::downgrade(shared), generation, timeout);
        }
        Ok(())
    }

    /// Stop a running scan. No-op unless the session is scanning.
    pub fn stop(&self) {
        self.shared.stop(None);
    }

    /// Stop if needed, then drop all devices and counters.
    pub fn reset(&self) {
        let _control = lock(&self.shared.control);
        self.shared.stop_locked(None);

        let mut core = lock(&self.shared.core);
        let config = core.registry.config().clone();
        core.registry = DeviceRegistry::new(config);
        core.started_at = None;
        core.stopped_at = None;
        if core.state != ScanState::Idle {
            core.state = ScanState::Idle;
            self.shared.sink.publish(SessionEvent::StateChanged(ScanState::Idle));
        }
        log::info!("Session reset");
        self.shared
            .sink
            .publish(SessionEvent::StatisticsUpdated(core.statistics()));
    }

    pub fn state(&self) -> ScanState {
        lock(&self.shared.core).state.clone()
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.shared.core).state == ScanState::Scanning
    }

    /// Configuration of the current (or last) run
    pub fn config(&self) -> ScanConfig {
        lock(&self.shared.core).registry.config().clone()
    }

    /// Copy of every known device
    pub fn devices(&self) -> Vec<DeviceRecord> {
        lock(&self.shared.core).registry.devices()
    }

    pub fn device(&self, address: &Address) -> Option<DeviceRecord> {
        lock(&self.shared.core).registry.device(address).cloned()
    }

    pub fn statistics(&self) -> ScanStatistics {
        lock(&self.shared.core).statistics()
    }

    /// Resolved addresses with their match counts
    pub fn resolved_addresses(&self) -> BTreeMap<Address, u32> {
        lock(&self.shared.core).registry.resolved_addresses()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.shared.stop(None);
    }
}

/// Stop scan `generation` after `timeout` unless the returned sender is
/// dropped first.
fn spawn_timeout(
    shared: Weak<Shared>,
    generation: u64,
    timeout: Duration,
) -> Option<mpsc::Sender<()>> {
    let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
    let spawned = thread::Builder::new()
        .name("scan-timeout".into())
        .spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                if let Some(shared) = shared.upgrade() {
                    if shared.stop(Some(generation)) {
                        log::info!("Scan timeout reached ({:?})", timeout);
                    }
                }
            }
        });

    match spawned {
        Ok(_) => Some(cancel_tx),
        Err(e) => {
            log::warn!("Scan timeout thread failed to spawn, scan is unbounded: {}", e);
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::IdentityKey;
    use crate::config::ScanMode;
    use crate::registry::Resolution;
    use crate::replay::ReplayRadio;
    use std::sync::atomic::{AtomicBool, Ordering};

    const PUBLIC: Address = Address::new([0x00, 0x1B, 0xD8, 0x01, 0x02, 0x03]);

    /// Reports (and optionally fails) from inside `start_scan`
    #[derive(Default)]
    struct EagerRadio {
        failure: Option<ScanFailure>,
        stopped: AtomicBool,
    }

    impl Radio for EagerRadio {
        fn is_enabled(&self) -> bool {
            true
        }

        fn start_scan(
            &self,
            _preference: ScanPreference,
            reports: ReportHandle,
        ) -> core::result::Result<(), ScanFailure> {
            reports.deliver(AdvertisementEvent::new(PUBLIC, -50, 0));
            if let Some(failure) = self.failure {
                reports.fail(failure);
            }
            Ok(())
        }

        fn stop_scan(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn session(radio: &Arc<ReplayRadio>) -> (ScanSession, mpsc::Receiver<SessionEvent>) {
        let (sink, rx) = ChannelSink::new();
        (ScanSession::new(Arc::clone(radio), sink), rx)
    }

    fn untimed() -> ScanConfig {
        ScanConfig {
            timeout: None,
            ..ScanConfig::new()
        }
    }

    fn drain(rx: &mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        rx.try_iter().collect()
    }

    fn wait_for_state(rx: &mpsc::Receiver<SessionEvent>, want: &ScanState) -> bool {
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            if event == SessionEvent::StateChanged(want.clone()) {
                return true;
            }
        }
        false
    }

    #[test]
    fn start_and_stop_transitions() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        assert_eq!(session.state(), ScanState::Idle);

        session.start(untimed()).unwrap();
        assert!(session.is_scanning());
        assert_eq!(drain(&rx), vec![SessionEvent::StateChanged(ScanState::Scanning)]);

        session.stop();
        assert_eq!(session.state(), ScanState::Idle);
        let events = drain(&rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SessionEvent::StateChanged(ScanState::Stopping));
        assert!(matches!(events[1], SessionEvent::StatisticsUpdated(_)));
        assert_eq!(events[2], SessionEvent::StateChanged(ScanState::Idle));
        assert!(!radio.is_scanning());
    }

    #[test]
    fn stop_outside_scanning_is_noop() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        session.stop();
        session.stop();
        assert!(drain(&rx).is_empty());
        assert_eq!(session.state(), ScanState::Idle);
    }

    #[test]
    fn start_while_scanning_is_rejected() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, _rx) = session(&radio);
        session.start(untimed()).unwrap();
        assert_eq!(session.start(untimed()), Err(Error::AlreadyScanning));
        assert!(session.is_scanning());
    }

    #[test]
    fn disabled_radio_enters_error() {
        let radio = Arc::new(ReplayRadio::disabled());
        let (session, rx) = session(&radio);
        assert_eq!(session.start(untimed()), Err(Error::RadioDisabled));
        assert_eq!(session.state(), ScanState::Error("Bluetooth is not enabled".into()));
        assert_eq!(drain(&rx).len(), 1);
    }

    #[test]
    fn unavailable_radio_enters_error() {
        let radio = Arc::new(ReplayRadio::unavailable());
        let (session, _rx) = session(&radio);
        assert_eq!(session.start(untimed()), Err(Error::RadioUnavailable));
        assert_eq!(session.state().as_str(), "error");
    }

    #[test]
    fn rejected_scan_request_enters_error() {
        let radio = Arc::new(ReplayRadio::rejecting(ScanFailure::RegistrationFailed));
        let (session, _rx) = session(&radio);
        assert_eq!(
            session.start(untimed()),
            Err(Error::ScanStartFailed(ScanFailure::RegistrationFailed))
        );
        assert_eq!(
            session.state().message(),
            Some("Failed to start scan: App registration failed")
        );
    }

    #[test]
    fn invalid_config_is_rejected_before_radio() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        let config = ScanConfig {
            smoothing_window: 0,
            ..untimed()
        };
        assert_eq!(session.start(config), Err(Error::InvalidSmoothingWindow));
        assert_eq!(session.state(), ScanState::Idle);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn radio_failure_while_scanning() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        session.start(untimed()).unwrap();
        drain(&rx);

        radio.fail(ScanFailure::InternalError);
        assert_eq!(session.state(), ScanState::Error("Internal error".into()));
        let failed = ScanState::Error("Internal error".into());
        assert_eq!(drain(&rx), vec![SessionEvent::StateChanged(failed)]);

        // Reports after the failure are ignored
        radio.deliver(AdvertisementEvent::new(PUBLIC, -50, 0));
        assert!(session.devices().is_empty());
    }

    #[test]
    fn deliveries_publish_update_then_statistics() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        session.start(untimed()).unwrap();
        drain(&rx);

        assert!(radio.deliver(AdvertisementEvent::new(PUBLIC, -50, 10)));
        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::DeviceUpdated { is_update: false, .. }));
        match &events[1] {
            SessionEvent::StatisticsUpdated(s) => {
                assert_eq!(s.total_detections, 1);
                assert_eq!(s.unique_devices, 1);
            }
            other => panic!("expected statistics, got {other:?}"),
        }
        assert_eq!(session.device(&PUBLIC).unwrap().detection_count, 1);
    }

    #[test]
    fn reports_during_start_are_counted() {
        let radio = Arc::new(EagerRadio::default());
        let (sink, rx) = ChannelSink::new();
        let session = ScanSession::new(Arc::clone(&radio), sink);

        session.start(untimed()).unwrap();
        assert!(session.is_scanning());
        assert_eq!(session.devices().len(), 1);
        assert_eq!(session.statistics().total_detections, 1);

        let events = drain(&rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::DeviceUpdated { is_update: false, .. }));
        assert!(matches!(events[1], SessionEvent::StatisticsUpdated(_)));
        assert_eq!(events[2], SessionEvent::StateChanged(ScanState::Scanning));
    }

    #[test]
    fn failure_during_start_enters_error() {
        let radio = Arc::new(EagerRadio {
            failure: Some(ScanFailure::InternalError),
            ..EagerRadio::default()
        });
        let (sink, _rx) = ChannelSink::new();
        let session = ScanSession::new(Arc::clone(&radio), sink);

        assert_eq!(
            session.start(untimed()),
            Err(Error::ScanStartFailed(ScanFailure::InternalError))
        );
        assert_eq!(session.state().as_str(), "error");
        assert!(session.devices().is_empty());
        assert!(radio.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_deliveries_are_all_counted() {
        const THREADS: u8 = 8;
        const PER_THREAD: u64 = 500;

        let radio = Arc::new(ReplayRadio::new());
        let (session, _rx) = session(&radio);
        session.start(untimed()).unwrap();

        thread::scope(|scope| {
            for t in 0..THREADS {
                let radio = &radio;
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        let address = Address::new([0x00, 0x1B, 0xD8, 0x00, t, (i % 50) as u8]);
                        assert!(radio.deliver(AdvertisementEvent::new(address, -60, i)));
                    }
                });
            }
        });

        let expected = u64::from(THREADS) * PER_THREAD;
        let stats = session.statistics();
        assert_eq!(stats.total_detections, expected);
        assert_eq!(stats.unique_devices, usize::from(THREADS) * 50);
        let counted: u64 = session.devices().iter().map(|d| u64::from(d.detection_count)).sum();
        assert_eq!(counted, expected);
    }

    #[test]
    fn floor_discards_are_silent() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        session
            .start(ScanConfig {
                min_rssi: Some(-60),
                ..untimed()
            })
            .unwrap();
        drain(&rx);

        radio.deliver(AdvertisementEvent::new(PUBLIC, -61, 0));
        assert!(drain(&rx).is_empty());
        assert_eq!(session.statistics().total_detections, 0);
    }

    #[test]
    fn identity_mode_non_rpa_end_to_end() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        let config = untimed().with_mode(ScanMode::IdentityResolution(IdentityKey::new([0; 16])));
        session.start(config).unwrap();
        drain(&rx);

        radio.deliver(AdvertisementEvent::new(PUBLIC, -40, 0));
        let events = drain(&rx);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::IdentityMatched(_))));
        assert_eq!(
            session.device(&PUBLIC).unwrap().resolution,
            Some(Resolution::NotApplicable)
        );
        assert!(session.resolved_addresses().is_empty());
    }

    #[test]
    fn start_resets_previous_run() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, _rx) = session(&radio);
        session.start(untimed()).unwrap();
        radio.deliver(AdvertisementEvent::new(PUBLIC, -50, 0));
        session.stop();
        assert_eq!(session.devices().len(), 1);

        session.start(untimed()).unwrap();
        assert!(session.devices().is_empty());
        assert_eq!(session.statistics().total_detections, 0);
    }

    #[test]
    fn reset_clears_registry_and_stops() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        session.start(untimed()).unwrap();
        radio.deliver(AdvertisementEvent::new(PUBLIC, -50, 0));
        drain(&rx);

        session.reset();
        assert_eq!(session.state(), ScanState::Idle);
        assert!(session.devices().is_empty());
        assert_eq!(session.statistics(), ScanStatistics::default());
        assert!(!radio.is_scanning());
    }

    #[test]
    fn timeout_stops_scan() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, rx) = session(&radio);
        session
            .start(ScanConfig {
                timeout: Some(Duration::from_millis(50)),
                ..ScanConfig::new()
            })
            .unwrap();

        assert!(wait_for_state(&rx, &ScanState::Idle));
        assert_eq!(session.state(), ScanState::Idle);
        assert!(!radio.deliver(AdvertisementEvent::new(PUBLIC, -50, 0)));
    }

    #[test]
    fn manual_stop_cancels_timeout() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, _rx) = session(&radio);
        session
            .start(ScanConfig {
                timeout: Some(Duration::from_millis(100)),
                ..ScanConfig::new()
            })
            .unwrap();
        session.stop();

        // A new unbounded run must survive the old deadline
        session.start(untimed()).unwrap();
        thread::sleep(Duration::from_millis(250));
        assert!(session.is_scanning());
    }

    #[test]
    fn elapsed_freezes_after_stop() {
        let radio = Arc::new(ReplayRadio::new());
        let (session, _rx) = session(&radio);
        session.start(untimed()).unwrap();
        thread::sleep(Duration::from_millis(10));
        session.stop();
        let first = session.statistics().elapsed;
        thread::sleep(Duration::from_millis(10));
        assert_eq!(session.statistics().elapsed, first);
        assert!(first >= Duration::from_millis(10));
    }

    #[test]
    fn closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let radio = Arc::new(ReplayRadio::new());
        let session = ScanSession::new(Arc::clone(&radio), move |e: SessionEvent| {
            lock(&sink_seen).push(e);
        });
        session.start(untimed()).unwrap();
        assert_eq!(lock(&seen).len(), 1);
    }
}
