//! The background phase detector.
//!
//! One dedicated thread runs the inference chain every poll interval. Phase and
//! timestamps live in atomics so readers never block; session metadata sits
//! behind a short-held `RwLock`; observers have their own registry lock.
//! Every write goes through a single update lock shared by the polling loop
//! and [`Detector::force_check`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::heuristics::{Debounce, PhaseInferenceEngine};
use super::observers::{CallbackId, ObserverRegistry};
use super::Phase;
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::probe::ProbeBackend;

const THREAD_NAME: &str = "phase-detector";

#[derive(Debug, Clone, Default)]
struct SessionInfo {
    name: String,
    id: String,
}

/// State shared between the detector handle and its polling thread
struct Shared {
    backend: Arc<dyn ProbeBackend>,
    config: DetectorConfig,
    /// Origin of the detector's monotonic millisecond clock
    epoch: Instant,
    phase: AtomicU8,
    running: AtomicBool,
    last_checked_ms: AtomicU64,
    /// 0 when not in a session
    session_joined_ms: AtomicU64,
    session: RwLock<SessionInfo>,
    /// Serializes inference and state writes; owns the debounce flag
    update_lock: Mutex<Debounce>,
    /// Thread currently dispatching observers while holding `update_lock`
    dispatcher: Mutex<Option<ThreadId>>,
    observers: ObserverRegistry,
}

impl Shared {
    /// Milliseconds since the detector was created, never 0
    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        elapsed.max(1)
    }

    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn is_dispatching_here(&self) -> bool {
        *lock(&self.dispatcher) == Some(thread::current().id())
    }

    /// Run one inference cycle and apply the result.
    fn run_cycle(&self) -> Phase {
        let mut debounce = lock(&self.update_lock);
        self.cycle_locked(&mut debounce)
    }

    /// One inference cycle with `update_lock` already held.
    ///
    /// A panicking backend skips the cycle and leaves the phase unchanged.
    fn cycle_locked(&self, debounce: &mut Debounce) -> Phase {
        let probed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.backend.begin_cycle();
            PhaseInferenceEngine::infer(
                self.backend.as_ref(),
                self.config.required_objects.as_slice(),
            )
        }));
        let computed = match probed {
            Ok(phase) => phase,
            Err(_) => {
                tracing::warn!("Probe backend panicked; skipping cycle");
                return self.phase();
            }
        };

        let reported = debounce.apply(computed);
        tracing::trace!(%computed, %reported, "Inference cycle");

        self.update_state(reported);
        reported
    }

    /// Store a newly inferred phase. Caller must hold `update_lock`.
    fn update_state(&self, new: Phase) {
        self.last_checked_ms.store(self.now_ms(), Ordering::Release);

        let old = self.phase();
        if old == new {
            return;
        }

        // Metadata is written before the phase so a reader that sees
        // InSession also sees the session it belongs to.
        if new == Phase::InSession {
            let info = panic::catch_unwind(AssertUnwindSafe(|| SessionInfo {
                name: self.backend.session_name(),
                id: self.backend.session_id(),
            }))
            .unwrap_or_else(|_| {
                tracing::warn!("Probe backend panicked reading session metadata");
                SessionInfo::default()
            });
            tracing::info!(session_name = %info.name, session_id = %info.id, "Joined session");
            *self.session.write().unwrap_or_else(PoisonError::into_inner) = info;
            self.session_joined_ms.store(self.now_ms(), Ordering::Release);
        }

        self.phase.store(new.as_u8(), Ordering::Release);

        if old == Phase::InSession {
            self.session_joined_ms.store(0, Ordering::Release);
            *self.session.write().unwrap_or_else(PoisonError::into_inner) =
                SessionInfo::default();
        }

        tracing::info!(%old, %new, "Phase changed");

        *lock(&self.dispatcher) = Some(thread::current().id());
        self.observers.notify(old, new);
        *lock(&self.dispatcher) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the running flag if the polling thread unwinds.
struct RunningGuard<'a>(&'a Shared);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.running.store(false, Ordering::Release);
            tracing::warn!("Detection loop panicked");
        }
    }
}

fn poll_loop(shared: Arc<Shared>) {
    let _guard = RunningGuard(&shared);
    let interval = shared.config.poll_interval();
    tracing::debug!(?interval, "Detection loop started");

    while shared.running.load(Ordering::Acquire) {
        {
            let mut debounce = lock(&shared.update_lock);
            // Stop may have been requested while a force_check held the lock
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            shared.cycle_locked(&mut debounce);
        }

        // Sleep until the next cycle; stop() unparks us early
        let deadline = Instant::now() + interval;
        while shared.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }

    tracing::debug!(phase = %shared.phase(), "Detection loop exited");
}

/// Detects which lifecycle phase the monitored application is in.
///
/// Observers registered with [`Detector::register_callback`] run synchronously
/// on the polling thread, or on the caller's thread for
/// [`Detector::force_check`]. They may query the detector, register or remove
/// observers, and call `stop`, but a `force_check` issued from inside an
/// observer is skipped and `stop` from inside one does not wait for the loop.
/// Dropping the last handle from inside an observer hands the polling thread
/// to a short-lived reaper thread that joins it.
pub struct Detector {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Detector {
    /// Create a detector with the default configuration.
    pub fn new(backend: Arc<dyn ProbeBackend>) -> Self {
        Self::build(backend, DetectorConfig::default())
    }

    pub fn with_config(backend: Arc<dyn ProbeBackend>, config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    fn build(backend: Arc<dyn ProbeBackend>, config: DetectorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                epoch: Instant::now(),
                phase: AtomicU8::new(Phase::Unknown.as_u8()),
                running: AtomicBool::new(false),
                last_checked_ms: AtomicU64::new(0),
                session_joined_ms: AtomicU64::new(0),
                session: RwLock::new(SessionInfo::default()),
                update_lock: Mutex::new(Debounce::default()),
                dispatcher: Mutex::new(None),
                observers: ObserverRegistry::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the polling thread.
    ///
    /// Returns false if it is already running, if called from inside an
    /// observer, or if the thread could not be spawned.
    pub fn start(&self) -> bool {
        if self.shared.is_dispatching_here() {
            tracing::warn!("Detector cannot be started from inside a state change observer");
            return false;
        }

        let mut worker = lock(&self.worker);
        if self.shared.running.load(Ordering::Acquire) {
            return false;
        }

        // A loop stopped from its own observer may still be winding down
        if let Some(previous) = worker.take() {
            previous.thread().unpark();
            if previous.join().is_err() {
                tracing::warn!("Previous detection thread panicked");
            }
        }

        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || poll_loop(shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!(
                    poll_interval_ms = self.shared.config.poll_interval_ms,
                    "Detector started"
                );
                true
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                tracing::warn!("Failed to spawn detection thread: {}", e);
                false
            }
        }
    }

    /// Stop the polling thread and wait for it to exit.
    ///
    /// No-op when not running. From inside an observer the loop is only
    /// flagged to stop, since waiting on it there would deadlock.
    pub fn stop(&self) {
        if self.shared.is_dispatching_here() {
            self.shared.running.store(false, Ordering::Release);
            tracing::debug!("Stop requested from an observer; loop exits after this cycle");
            return;
        }

        let mut worker = lock(&self.worker);
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);

        if let Some(handle) = worker.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!("Detection thread panicked");
            }
        }

        if was_running {
            tracing::info!(phase = %self.state(), "Detector stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register an observer for phase transitions. It is not invoked immediately.
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(Phase, Phase) + Send + Sync + 'static,
    {
        self.shared.observers.register(callback)
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.shared.observers.remove(id)
    }

    /// Current phase, without locking
    pub fn state(&self) -> Phase {
        self.shared.phase()
    }

    pub fn is_in_session(&self) -> bool {
        self.state() == Phase::InSession
    }

    /// Name of the current session, or empty when not in one
    pub fn session_name(&self) -> String {
        self.session_info().name
    }

    /// Identifier of the current session, or empty when not in one
    pub fn session_id(&self) -> String {
        self.session_info().id
    }

    fn session_info(&self) -> SessionInfo {
        if !self.is_in_session() {
            return SessionInfo::default();
        }
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Time since the session was joined, or zero when not in one
    pub fn session_duration(&self) -> Duration {
        if !self.is_in_session() {
            return Duration::ZERO;
        }
        match self.shared.session_joined_ms.load(Ordering::Acquire) {
            0 => Duration::ZERO,
            joined => Duration::from_millis(self.shared.now_ms().saturating_sub(joined)),
        }
    }

    /// Whole seconds in the current session, 0 when not in one.
    ///
    /// The first partial second counts as 1, so this is never 0 while in a session.
    pub fn time_in_session(&self) -> u64 {
        if !self.is_in_session() {
            return 0;
        }
        self.session_duration().as_secs().max(1)
    }

    /// Detector clock reading (ms) of the last completed cycle, 0 if none ran yet
    pub fn last_checked_ms(&self) -> u64 {
        self.shared.last_checked_ms.load(Ordering::Acquire)
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.config.poll_interval()
    }

    /// Run one inference cycle now and return the resulting phase.
    ///
    /// Serialized with the polling loop, so a transition is applied and
    /// notified exactly once no matter which side observes it first.
    pub fn force_check(&self) -> Phase {
        if self.shared.is_dispatching_here() {
            tracing::warn!("force_check called from inside an observer; skipping cycle");
            return self.state();
        }
        self.shared.run_cycle()
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();

        // stop() only flags the loop when dropped from inside an observer
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            handle.thread().unpark();
            let reaper = thread::Builder::new()
                .name(format!("{}-reaper", THREAD_NAME))
                .spawn(move || {
                    if handle.join().is_err() {
                        tracing::warn!("Detection thread panicked");
                    }
                });
            if let Err(e) = reaper {
                tracing::warn!("Failed to spawn reaper thread: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeSnapshot, ScriptedBackend};
    use std::sync::atomic::AtomicUsize;

    fn detector_with(steps: Vec<ProbeSnapshot>) -> (Arc<ScriptedBackend>, Detector) {
        let backend = Arc::new(ScriptedBackend::new(steps));
        let config = DetectorConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        let detector = Detector::with_config(backend.clone(), config).unwrap();
        (backend, detector)
    }

    fn record_transitions(detector: &Detector) -> Arc<Mutex<Vec<(Phase, Phase)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        detector.register_callback(move |old, new| sink.lock().unwrap().push((old, new)));
        seen
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_initial_state() {
        let (_, detector) = detector_with(vec![]);
        assert_eq!(detector.state(), Phase::Unknown);
        assert!(!detector.is_running());
        assert!(!detector.is_in_session());
        assert_eq!(detector.last_checked_ms(), 0);
        assert_eq!(detector.time_in_session(), 0);
        assert!(detector.session_name().is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let backend = Arc::new(ScriptedBackend::default());
        let config = DetectorConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(Detector::with_config(backend, config).is_err());
    }

    #[test]
    fn test_force_check_walks_lifecycle() {
        let (_, detector) = detector_with(vec![
            ProbeSnapshot::not_running(),
            ProbeSnapshot::loading(),
            ProbeSnapshot::menu(),
            ProbeSnapshot::in_session("Obby", "42"),
        ]);

        assert_eq!(detector.force_check(), Phase::NotRunning);
        assert_eq!(detector.force_check(), Phase::Loading);
        assert_eq!(detector.force_check(), Phase::Menu);
        assert_eq!(detector.force_check(), Phase::InSession);
        assert!(detector.last_checked_ms() > 0);
    }

    #[test]
    fn test_expected_phase_matches_detector() {
        let snapshots = [
            ProbeSnapshot::not_running(),
            ProbeSnapshot::loading(),
            ProbeSnapshot::menu(),
            ProbeSnapshot {
                camera: false,
                ..ProbeSnapshot::in_session("Obby", "42")
            },
            ProbeSnapshot::in_session("Obby", "42"),
        ];

        for snapshot in snapshots {
            let (_, detector) = detector_with(vec![snapshot.clone()]);
            assert_eq!(detector.force_check(), snapshot.expected_phase());
        }
    }

    #[test]
    fn test_debounce_sequence() {
        let (_, detector) = detector_with(vec![
            ProbeSnapshot::in_session("Obby", "42"),
            ProbeSnapshot::in_session("Obby", "42"),
            ProbeSnapshot::not_running(),
            ProbeSnapshot::not_running(),
        ]);
        let seen = record_transitions(&detector);

        let phases: Vec<Phase> = (0..4).map(|_| detector.force_check()).collect();
        assert_eq!(
            phases,
            vec![
                Phase::InSession,
                Phase::InSession,
                Phase::Leaving,
                Phase::NotRunning
            ]
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Phase::Unknown, Phase::InSession),
                (Phase::InSession, Phase::Leaving),
                (Phase::Leaving, Phase::NotRunning),
            ]
        );
    }

    #[test]
    fn test_session_metadata_follows_phase() {
        let (_, detector) = detector_with(vec![
            ProbeSnapshot::in_session("Obby", "42"),
            ProbeSnapshot::menu(),
        ]);

        detector.force_check();
        assert!(detector.is_in_session());
        assert_eq!(detector.session_name(), "Obby");
        assert_eq!(detector.session_id(), "42");
        assert!(detector.time_in_session() > 0);

        assert_eq!(detector.force_check(), Phase::Leaving);
        assert!(detector.session_name().is_empty());
        assert!(detector.session_id().is_empty());
        assert_eq!(detector.time_in_session(), 0);
        assert_eq!(detector.session_duration(), Duration::ZERO);
    }

    #[test]
    fn test_metadata_captured_on_join_only() {
        let (_, detector) = detector_with(vec![
            ProbeSnapshot::in_session("Obby", "42"),
            ProbeSnapshot::in_session("Other", "7"),
        ]);

        detector.force_check();
        detector.force_check();
        assert_eq!(detector.session_name(), "Obby");
        assert_eq!(detector.session_id(), "42");
    }

    #[test]
    fn test_callbacks_fire_once_in_order() {
        let (_, detector) = detector_with(vec![ProbeSnapshot::menu(), ProbeSnapshot::menu()]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..4 {
            let sink = Arc::clone(&seen);
            detector.register_callback(move |old, new| sink.lock().unwrap().push((n, old, new)));
        }

        detector.force_check();
        detector.force_check();

        let expected: Vec<_> = (0..4).map(|n| (n, Phase::Unknown, Phase::Menu)).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn test_removed_callback_not_invoked() {
        let (_, detector) = detector_with(vec![ProbeSnapshot::menu()]);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = detector.register_callback(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(detector.remove_callback(id));
        assert!(!detector.remove_callback(id));
        assert!(!detector.remove_callback(id + 100));

        detector.force_check();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let (_, detector) = detector_with(vec![ProbeSnapshot::menu()]);

        assert!(detector.start());
        assert!(!detector.start());
        assert!(detector.is_running());

        detector.stop();
        assert!(!detector.is_running());
        detector.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);

        assert!(detector.start());
        detector.stop();
        let cycles = backend.cycles();

        assert!(detector.start());
        assert!(wait_for(|| backend.cycles() > cycles));
        detector.stop();
    }

    #[test]
    fn test_loop_detects_join_and_leave() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);
        let seen = record_transitions(&detector);

        assert!(detector.start());
        assert!(wait_for(|| detector.state() == Phase::Menu));

        backend.push(ProbeSnapshot::in_session("Obby", "42"));
        assert!(wait_for(|| detector.is_in_session()));
        assert_eq!(detector.session_name(), "Obby");

        backend.push(ProbeSnapshot::not_running());
        assert!(wait_for(|| detector.state() == Phase::NotRunning));
        detector.stop();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Phase::Unknown, Phase::Menu),
                (Phase::Menu, Phase::InSession),
                (Phase::InSession, Phase::Leaving),
                (Phase::Leaving, Phase::NotRunning),
            ]
        );
    }

    #[test]
    fn test_state_frozen_after_stop() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);

        assert!(detector.start());
        assert!(wait_for(|| detector.state() == Phase::Menu));
        detector.stop();

        let cycles = backend.cycles();
        let checked = detector.last_checked_ms();
        backend.push(ProbeSnapshot::in_session("Obby", "42"));
        thread::sleep(Duration::from_millis(50));

        assert_eq!(detector.state(), Phase::Menu);
        assert_eq!(backend.cycles(), cycles);
        assert_eq!(detector.last_checked_ms(), checked);
    }

    #[test]
    fn test_concurrent_force_check_no_double_fire() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);
        let detector = Arc::new(detector);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        detector.register_callback(move |_, new| {
            if new == Phase::InSession {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(detector.start());
        assert!(wait_for(|| detector.state() == Phase::Menu));
        backend.push(ProbeSnapshot::in_session("Obby", "42"));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let detector = Arc::clone(&detector);
                thread::spawn(move || {
                    for _ in 0..25 {
                        detector.force_check();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        detector.stop();

        assert_eq!(detector.state(), Phase::InSession);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_from_observer_does_not_deadlock() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);
        let detector = Arc::new(detector);

        let weak = Arc::downgrade(&detector);
        detector.register_callback(move |_, new| {
            if new == Phase::InSession {
                if let Some(detector) = weak.upgrade() {
                    detector.stop();
                }
            }
        });

        assert!(detector.start());
        backend.push(ProbeSnapshot::in_session("Obby", "42"));
        assert!(wait_for(|| !detector.is_running()));
        assert_eq!(detector.state(), Phase::InSession);

        // The flagged loop is joined on restart
        assert!(detector.start());
        detector.stop();
    }

    #[test]
    fn test_force_check_inside_observer_is_skipped() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu(), ProbeSnapshot::loading()]);
        let detector = Arc::new(detector);
        let nested = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&detector);
        let sink = Arc::clone(&nested);
        detector.register_callback(move |_, _| {
            if let Some(detector) = weak.upgrade() {
                sink.lock().unwrap().push(detector.force_check());
            }
        });

        assert_eq!(detector.force_check(), Phase::Menu);
        assert_eq!(*nested.lock().unwrap(), vec![Phase::Menu]);
        assert_eq!(backend.cycles(), 1);
    }

    #[test]
    fn test_drop_joins_thread() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);
        assert!(detector.start());
        assert!(wait_for(|| backend.cycles() > 0));
        drop(detector);

        let cycles = backend.cycles();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.cycles(), cycles);
    }

    /// Backend that panics on one chosen cycle, or whenever metadata is read
    struct FlakyBackend {
        inner: ScriptedBackend,
        calls: AtomicU64,
        panic_on_cycle: u64,
        panic_on_metadata: bool,
    }

    impl FlakyBackend {
        fn new(steps: Vec<ProbeSnapshot>, panic_on_cycle: u64, panic_on_metadata: bool) -> Self {
            Self {
                inner: ScriptedBackend::new(steps),
                calls: AtomicU64::new(0),
                panic_on_cycle,
                panic_on_metadata,
            }
        }
    }

    impl ProbeBackend for FlakyBackend {
        fn begin_cycle(&self) {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.panic_on_cycle {
                panic!("backend lost the process handle");
            }
            self.inner.begin_cycle();
        }

        fn object_exists(&self, path: &str) -> bool {
            self.inner.object_exists(path)
        }

        fn services_loaded(&self) -> bool {
            self.inner.services_loaded()
        }

        fn valid_local_player(&self) -> bool {
            self.inner.valid_local_player()
        }

        fn valid_camera(&self) -> bool {
            self.inner.valid_camera()
        }

        fn session_name(&self) -> String {
            if self.panic_on_metadata {
                panic!("session name unreadable");
            }
            self.inner.session_name()
        }

        fn session_id(&self) -> String {
            self.inner.session_id()
        }
    }

    fn flaky_detector(backend: Arc<FlakyBackend>) -> Detector {
        let config = DetectorConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        Detector::with_config(backend, config).unwrap()
    }

    #[test]
    fn test_backend_panic_keeps_loop_alive() {
        let backend = Arc::new(FlakyBackend::new(
            vec![ProbeSnapshot::menu(), ProbeSnapshot::in_session("Obby", "42")],
            2,
            false,
        ));
        let detector = flaky_detector(backend.clone());

        assert!(detector.start());
        assert!(wait_for(|| detector.is_in_session()));
        assert!(backend.calls.load(Ordering::SeqCst) > 2);
        assert!(detector.is_running());
        assert!(!detector.start());

        detector.stop();
        assert!(!detector.is_running());
        assert!(detector.start());
        detector.stop();
    }

    #[test]
    fn test_backend_panic_skips_forced_cycle() {
        let backend = Arc::new(FlakyBackend::new(vec![ProbeSnapshot::menu()], 1, false));
        let detector = flaky_detector(backend);
        let seen = record_transitions(&detector);

        assert_eq!(detector.force_check(), Phase::Unknown);
        assert_eq!(detector.last_checked_ms(), 0);
        assert_eq!(detector.force_check(), Phase::Menu);
        assert_eq!(*seen.lock().unwrap(), vec![(Phase::Unknown, Phase::Menu)]);
    }

    #[test]
    fn test_metadata_panic_joins_without_metadata() {
        let backend = Arc::new(FlakyBackend::new(
            vec![ProbeSnapshot::in_session("Obby", "42")],
            0,
            true,
        ));
        let detector = flaky_detector(backend);

        assert_eq!(detector.force_check(), Phase::InSession);
        assert!(detector.session_name().is_empty());
        assert!(detector.time_in_session() > 0);
    }

    #[test]
    fn test_drop_inside_observer_joins_loop() {
        let (backend, detector) = detector_with(vec![ProbeSnapshot::menu()]);
        let slot = Arc::new(Mutex::new(Some(Arc::new(detector))));

        let dropper = Arc::clone(&slot);
        let owned = slot.lock().unwrap().clone().unwrap();
        owned.register_callback(move |_, new| {
            if new == Phase::InSession {
                let last = dropper.lock().unwrap().take();
                drop(last);
            }
        });
        assert!(owned.start());
        drop(owned);

        backend.push(ProbeSnapshot::in_session("Obby", "42"));
        assert!(wait_for(|| slot.lock().unwrap().is_none()));

        thread::sleep(Duration::from_millis(30));
        let cycles = backend.cycles();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.cycles(), cycles);
    }
}
