//! The catalog seam between the collection engine and the instrument layer.

use std::collections::HashMap;

use thiserror::Error;

use super::types::{Instrument, Measurand};

/// Errors that can occur at the instrument catalog boundary.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No connected instrument carries this identifier.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// A component/sensor/measurand index does not exist in the tree.
    #[error("no {kind} at index {index}")]
    IndexOutOfRange { kind: &'static str, index: usize },

    /// A model invariant was violated at construction (id range, duplicate,
    /// zero interval).
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Instrument communication failed.
    #[error("instrument i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Access to connected instruments and their most recent values.
///
/// Implementations own the instrument tree; `refresh_value` mutates exactly
/// the addressed measurand in place and returns a snapshot of it. The
/// engine holds a single catalog instance for the whole process and drives
/// it from one task, so no interior locking is required.
#[async_trait::async_trait]
pub trait Catalog: Send {
    /// The connected instruments, in discovery order.
    fn instruments(&self) -> &[Instrument];

    /// Look up an instrument by identifier.
    fn instrument(&self, id: &str) -> Option<&Instrument> {
        self.instruments().iter().find(|i| i.id() == id)
    }

    /// Apply per-sensor interval overrides (sensor name -> seconds) before
    /// a run starts. Unknown sensor names are ignored.
    fn synchronize(&mut self, overrides: &HashMap<String, u64>);

    /// Refresh the addressed measurand from the instrument and return its
    /// updated state.
    ///
    /// # Errors
    /// `UnknownInstrument` or `IndexOutOfRange` if the address does not
    /// resolve, `Io` if instrument communication fails.
    async fn refresh_value(
        &mut self,
        instrument_id: &str,
        component_idx: usize,
        sensor_idx: usize,
        measurand_idx: usize,
    ) -> Result<Measurand, CatalogError>;

    /// Begin the instrument's autonomous sampling cycle.
    async fn start_cycle(&mut self, instrument_id: &str) -> Result<(), CatalogError>;

    /// End the instrument's autonomous sampling cycle.
    async fn stop_cycle(&mut self, instrument_id: &str) -> Result<(), CatalogError>;
}
