//! datacollector - Instrument Sampling and Fan-Out Library
//!
//! This crate provides the core functionality for the datacollector
//! service: it periodically samples values from instrument sensors, each
//! on its own interval, and delivers every sampled value to one target
//! (screen, MQTT broker, or Zabbix server). It can be used as a library
//! or run as a standalone binary with the `datacollector` executable.
//!
//! # Architecture
//!
//! - **Catalog**: the instrument/component/sensor/measurand tree and the
//!   seam to the instrument-communication layer
//! - **Lock**: cross-process exclusivity so one collector owns an
//!   instrument set at a time
//! - **Session**: versioned last-run snapshot for argumentless resume
//! - **Scheduler**: cooperative tick-driven per-sensor jobs
//! - **Dispatch**: target-typed delivery with wire formatting
//! - **Transport**: MQTT and Zabbix clients
//! - **Runtime**: the lifecycle state machine wiring it all together
//!
//! # Example
//!
//! ```rust,no_run
//! use datacollector::{AppConfig, RunOptions, Runtime, SimCatalog, Target};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = AppConfig::discover()?;
//! let mut runtime = Runtime::new(config, SimCatalog::with_demo_cluster());
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! runtime
//!     .run(RunOptions::new(Target::Screen, "mycluster.lock"), shutdown_rx)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod lock;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use catalog::{Catalog, CatalogError, Component, Instrument, Measurand, Sensor, SimCatalog};
pub use config::{AppConfig, ConfigError};
pub use dispatch::{Dispatcher, JobSpec, Target};
pub use lock::{FileLock, LockError, LockGuard, DEFAULT_LOCK_TIMEOUT, LOCK_HINT};
pub use runtime::{RunError, RunOptions, RunState, Runtime, TICK};
pub use scheduler::{JobId, ScheduleError, Scheduler};
pub use session::{Session, SessionError, DEFAULT_LOCK_PATH, SESSION_FILE};
pub use transport::{MqttTransport, TransportError, ZabbixSender};
