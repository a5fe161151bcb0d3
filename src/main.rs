//! datacollector Binary Entry Point
//!
//! Command line application that gives back the most recent value of an
//! instrument whenever it is called, or runs as a long-lived collector
//! transmitting every value to a target. Core functionality is provided
//! by the `datacollector` library crate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use datacollector::{
    catalog::Catalog,
    config::AppConfig,
    dispatch::Target,
    lock::{FileLock, LockError, LOCK_HINT},
    runtime::{RunError, RunOptions, Runtime},
    session::{Session, SESSION_FILE},
    SimCatalog,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// datacollector - periodic instrument sampling with fan-out
#[derive(Parser, Debug)]
#[command(name = "datacollector", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Command {
    /// Print the most recent value of one measurand and exit.
    Value {
        /// Instrument id. Run `datacollector cluster` for the list of
        /// available instruments.
        #[arg(long, default_value = "j2hRuRDy")]
        instrument: String,

        /// The id of the sensor component.
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=63))]
        component: u8,

        /// The id of the sensor of the component.
        #[arg(long, default_value_t = 0)]
        sensor: u8,

        /// The id of the measurand of the sensor.
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
        measurand: u8,

        /// The path and file name of the lock file.
        #[arg(long, default_value = "mycluster.lock")]
        lock_path: PathBuf,
    },

    /// Show the list of connected instruments.
    Cluster {
        /// The path and file name of the lock file.
        #[arg(long, default_value = "mycluster.lock")]
        lock_path: PathBuf,
    },

    /// Transmit all gathered values to a target on each sensor's interval.
    Transmit {
        /// Where the values shall go to.
        #[arg(long, value_enum, default_value_t = Target::Screen)]
        target: Target,

        /// The path and file name of the lock file.
        #[arg(long, default_value = "mycluster.lock")]
        lock_path: PathBuf,
    },

    /// Resume the previously persisted transmit run as a continuous service.
    LastSession,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,datacollector=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::discover()?;
    tracing::debug!(
        "broker = {}, client_id = {}",
        config.mqtt.broker,
        config.mqtt.client_id
    );

    let catalog = SimCatalog::with_demo_cluster();

    match cli.command {
        Command::Value {
            instrument,
            component,
            sensor,
            measurand,
            lock_path,
        } => cmd_value(config, catalog, &instrument, component, sensor, measurand, lock_path).await,
        Command::Cluster { lock_path } => cmd_cluster(config, catalog, lock_path).await,
        Command::Transmit { target, lock_path } => {
            run_transmit(config, catalog, RunOptions::new(target, lock_path)).await
        }
        Command::LastSession => {
            let session = match Session::load_from(SESSION_FILE) {
                Ok(session) => {
                    tracing::debug!(?session, "Using arguments from last run");
                    session
                }
                Err(e) => {
                    tracing::debug!(error = %e, "No last run detected. Using defaults.");
                    Session::default()
                }
            };
            run_transmit(config, catalog, session.into()).await
        }
    }
}

/// Acquire the lock, read and print exactly one measurand.
async fn cmd_value(
    config: AppConfig,
    mut catalog: SimCatalog,
    instrument: &str,
    component: u8,
    sensor: u8,
    measurand: u8,
    lock_path: PathBuf,
) -> anyhow::Result<()> {
    let lock = FileLock::new(lock_path);
    let _guard = match lock.acquire(config.lock_timeout).await {
        Ok(guard) => guard,
        Err(LockError::Timeout(_)) => {
            println!("{}", LOCK_HINT);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let measurand = catalog
        .refresh_value(
            instrument,
            component as usize,
            sensor as usize,
            measurand as usize,
        )
        .await?;
    println!("{}", measurand);
    Ok(())
}

/// Acquire the lock and print the instrument/component tree.
async fn cmd_cluster(
    config: AppConfig,
    catalog: SimCatalog,
    lock_path: PathBuf,
) -> anyhow::Result<()> {
    let lock = FileLock::new(lock_path);
    let _guard = match lock.acquire(config.lock_timeout).await {
        Ok(guard) => guard,
        Err(LockError::Timeout(_)) => {
            println!("{}", LOCK_HINT);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for instrument in catalog.instruments() {
        println!("{}", instrument);
        for component in instrument.components() {
            println!("{}", component);
        }
    }
    Ok(())
}

/// Start a scheduled run with signal-driven shutdown.
async fn run_transmit(
    config: AppConfig,
    catalog: SimCatalog,
    opts: RunOptions,
) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Termination signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut runtime = Runtime::new(config, catalog);
    match runtime.run(opts, shutdown_rx).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(RunError::Lock(LockError::Timeout(_))) => {
            println!("{}", LOCK_HINT);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
