//! Run lifecycle: lock, persist, connect, cycle, schedule, tick, stop.
//!
//! One [`Runtime`] drives one run from lock acquisition to shutdown. All
//! job firings happen on the runtime's task, sequentially, once per tick;
//! termination is a watch channel set by the signal listener and observed
//! at the top of every tick. The lock guard is scoped to the run, so it is
//! released on every exit path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::catalog::{Catalog, CatalogError};
use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, JobSpec, Target};
use crate::lock::{FileLock, LockError};
use crate::scheduler::{ScheduleError, Scheduler};
use crate::session::{Session, SessionError, SESSION_FILE};
use crate::transport::{MqttTransport, TransportError};

/// Wall-clock granularity of the pending-job check.
pub const TICK: Duration = Duration::from_secs(1);

/// States of one run, in order of traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Locking,
    Connecting,
    Cycling,
    Scheduling,
    Running,
    Stopping,
    Stopped,
}

/// The parameters a run is launched with; exactly what a session persists.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: Target,
    pub lock_path: PathBuf,
}

impl RunOptions {
    pub fn new(target: Target, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            target,
            lock_path: lock_path.into(),
        }
    }

    /// The session snapshot that reproduces this run.
    pub fn session(&self) -> Session {
        Session::new(self.target, &self.lock_path)
    }
}

impl From<Session> for RunOptions {
    fn from(session: Session) -> Self {
        Self {
            target: session.target,
            lock_path: session.lock_path,
        }
    }
}

/// Errors that can end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Owns the catalog and drives the collection lifecycle.
pub struct Runtime<C: Catalog> {
    config: AppConfig,
    catalog: C,
    state: RunState,
    session_file: PathBuf,
}

impl<C: Catalog> Runtime<C> {
    pub fn new(config: AppConfig, catalog: C) -> Self {
        Self {
            config,
            catalog,
            state: RunState::Idle,
            session_file: PathBuf::from(SESSION_FILE),
        }
    }

    /// Override the session snapshot location (tests, mainly).
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = path.into();
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
    }

    /// Execute one full run. Returns when `shutdown` is signalled or a
    /// non-recoverable setup error occurs; the lock is released either way.
    pub async fn run(
        &mut self,
        opts: RunOptions,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), RunError> {
        self.transition(RunState::Locking);
        let lock = FileLock::new(&opts.lock_path);
        let guard = match lock.acquire(self.config.lock_timeout).await {
            Ok(guard) => guard,
            Err(e) => {
                self.transition(RunState::Stopped);
                return Err(e.into());
            }
        };

        let result = self.run_locked(&opts, &mut shutdown).await;
        drop(guard);
        self.transition(RunState::Stopped);
        result
    }

    /// Setup and tick loop, then the Stopping sequence. The teardown runs
    /// whether the loop ended by shutdown or a setup step failed partway;
    /// only cycles that actually started are stopped.
    async fn run_locked(
        &mut self,
        opts: &RunOptions,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), RunError> {
        let mut dispatcher = Dispatcher::new(opts.target, &self.config);
        let mut scheduler = Scheduler::new();
        let mut started: Vec<String> = Vec::new();

        let result = self
            .run_until_shutdown(opts, shutdown, &mut dispatcher, &mut scheduler, &mut started)
            .await;

        self.transition(RunState::Stopping);
        for id in &started {
            match self.catalog.stop_cycle(id).await {
                Ok(()) => tracing::info!("Device {} stopped.", id),
                Err(e) => tracing::warn!(device = %id, error = %e, "Failed to stop cycle"),
            }
        }
        if let Some(transport) = dispatcher.take_mqtt() {
            transport.disconnect().await;
        }
        scheduler.cancel_all();
        result
    }

    async fn run_until_shutdown(
        &mut self,
        opts: &RunOptions,
        shutdown: &mut watch::Receiver<bool>,
        dispatcher: &mut Dispatcher,
        scheduler: &mut Scheduler<JobSpec>,
        started: &mut Vec<String>,
    ) -> Result<(), RunError> {
        opts.session().save_to(&self.session_file)?;

        self.transition(RunState::Connecting);
        if opts.target == Target::Mqtt {
            let transport = MqttTransport::connect(
                &self.config.mqtt.broker,
                self.config.mqtt.port,
                &self.config.mqtt.client_id,
            )
            .await?;
            dispatcher.attach_mqtt(transport);
        }

        self.transition(RunState::Cycling);
        let overrides: HashMap<String, u64> = self.config.cycles.clone();
        self.catalog.synchronize(&overrides);
        let instrument_ids: Vec<String> = self
            .catalog
            .instruments()
            .iter()
            .map(|i| i.id().to_string())
            .collect();
        for id in &instrument_ids {
            self.catalog.start_cycle(id).await?;
            started.push(id.clone());
            tracing::info!("Device {} started and locked.", id);
        }

        self.transition(RunState::Scheduling);
        for instrument in self.catalog.instruments() {
            for (component_idx, component) in instrument.components().iter().enumerate() {
                for (sensor_idx, sensor) in component.sensors().iter().enumerate() {
                    scheduler.schedule(
                        sensor.interval(),
                        JobSpec {
                            instrument_id: instrument.id().to_string(),
                            component_idx,
                            sensor_idx,
                        },
                    )?;
                    tracing::debug!(
                        "Poll sensor {} of device {} in intervals of {} s.",
                        sensor.name(),
                        instrument.id(),
                        sensor.interval().as_secs()
                    );
                }
            }
        }

        self.transition(RunState::Running);
        tracing::info!("Waiting for first set of values");
        println!("Press Ctrl+C to abort.");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    // A closed channel counts as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(TICK) => {
                    let now = Instant::now();
                    for job in scheduler.take_due(now) {
                        if let Err(e) = dispatcher.dispatch(&mut self.catalog, &job).await {
                            tracing::error!(error = %e, "Dispatch failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Component, Instrument, Measurand, Sensor, SimCatalog};
    use crate::session::Session;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.lock_timeout = Duration::from_millis(200);
        config
    }

    /// Catalog whose `start_cycle` fails for one instrument, as a dead
    /// serial port would.
    struct FlakyCatalog {
        inner: SimCatalog,
        failing_id: String,
    }

    impl FlakyCatalog {
        fn new(failing_id: &str) -> Self {
            let instruments = ["alpha", "beta"]
                .iter()
                .map(|id| {
                    let measurands = vec![Measurand::new(0, "recent").unwrap()];
                    let sensor =
                        Sensor::new(0, "radon", Duration::from_secs(10), measurands).unwrap();
                    let component = Component::new(0, vec![sensor]).unwrap();
                    Instrument::new(*id, vec![component]).unwrap()
                })
                .collect();
            Self {
                inner: SimCatalog::new(instruments),
                failing_id: failing_id.to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Catalog for FlakyCatalog {
        fn instruments(&self) -> &[Instrument] {
            self.inner.instruments()
        }

        fn synchronize(&mut self, overrides: &HashMap<String, u64>) {
            self.inner.synchronize(overrides)
        }

        async fn refresh_value(
            &mut self,
            instrument_id: &str,
            component_idx: usize,
            sensor_idx: usize,
            measurand_idx: usize,
        ) -> Result<crate::catalog::Measurand, CatalogError> {
            self.inner
                .refresh_value(instrument_id, component_idx, sensor_idx, measurand_idx)
                .await
        }

        async fn start_cycle(&mut self, instrument_id: &str) -> Result<(), CatalogError> {
            if instrument_id == self.failing_id {
                return Err(CatalogError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "serial port gone",
                )));
            }
            self.inner.start_cycle(instrument_id).await
        }

        async fn stop_cycle(&mut self, instrument_id: &str) -> Result<(), CatalogError> {
            self.inner.stop_cycle(instrument_id).await
        }
    }

    #[tokio::test]
    async fn test_run_aborts_on_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cluster.lock");
        let session_path = dir.path().join("session.json");

        let holder = FileLock::new(&lock_path);
        let _guard = holder.acquire(Duration::from_millis(100)).await.unwrap();

        let mut runtime = Runtime::new(test_config(), SimCatalog::with_demo_cluster())
            .with_session_file(&session_path);
        let (_tx, rx) = watch::channel(false);
        let err = runtime
            .run(RunOptions::new(Target::Screen, &lock_path), rx)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Lock(LockError::Timeout(_))));
        assert_eq!(runtime.state(), RunState::Stopped);
        // The aborted run had no side effects.
        assert!(!session_path.exists());
        assert_eq!(runtime.catalog().cycles_started(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_cycles_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cluster.lock");
        let session_path = dir.path().join("session.json");

        let mut runtime = Runtime::new(test_config(), SimCatalog::with_demo_cluster())
            .with_session_file(&session_path);

        // Shutdown already requested: the run sets up, fires nothing, and
        // tears down.
        let (tx, rx) = watch::channel(true);
        runtime
            .run(RunOptions::new(Target::Screen, &lock_path), rx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(runtime.state(), RunState::Stopped);
        assert_eq!(runtime.catalog().cycles_started(), 1);
        assert_eq!(runtime.catalog().cycles_stopped(), 1);
        assert!(!runtime.catalog().is_cycling("j2hRuRDy"));

        // The session was persisted for `last_session`.
        let session = Session::load_from(&session_path).unwrap();
        assert_eq!(session.target, Target::Screen);
        assert_eq!(session.lock_path, lock_path);

        // The lock is free again.
        let lock = FileLock::new(&lock_path);
        assert!(lock.acquire(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_setup_failure_still_stops_started_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("cluster.lock");
        let session_path = dir.path().join("session.json");

        // "alpha" starts fine, "beta" fails, so the run aborts mid-Cycling.
        let mut runtime = Runtime::new(test_config(), FlakyCatalog::new("beta"))
            .with_session_file(&session_path);
        let (_tx, rx) = watch::channel(false);
        let err = runtime
            .run(RunOptions::new(Target::Screen, &lock_path), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Catalog(CatalogError::Io(_))));
        assert_eq!(runtime.state(), RunState::Stopped);

        // The cycle that did start was stopped again on the error path.
        assert!(!runtime.catalog().inner.is_cycling("alpha"));
        assert!(!runtime.catalog().inner.is_cycling("beta"));
        assert_eq!(runtime.catalog().inner.cycles_started(), 1);
        assert_eq!(runtime.catalog().inner.cycles_stopped(), 1);

        // And the lock is free for the next attempt.
        let lock = FileLock::new(&lock_path);
        assert!(lock.acquire(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_resumed_session_reproduces_run_options() {
        let opts = RunOptions::new(Target::Zabbix, "a.lock");
        let resumed: RunOptions = opts.session().into();
        assert_eq!(resumed.target, opts.target);
        assert_eq!(resumed.lock_path, opts.lock_path);
    }
}
