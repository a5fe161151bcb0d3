//! Instrument Catalog
//!
//! The data model for connected instruments and the [`Catalog`] trait the
//! collection engine talks to. The real instrument-communication layer
//! lives behind this seam; [`SimCatalog`] is the in-crate implementation
//! with synthetic values.
//!
//! # Architecture
//!
//! - [`Instrument`] / [`Component`] / [`Sensor`] / [`Measurand`]: the
//!   instrument tree, with identifier ranges enforced at construction
//! - [`Catalog`]: enumeration, value refresh, and cycle start/stop
//! - [`SimCatalog`]: deterministic stand-in for hardware

mod sim;
mod traits;
mod types;

pub use sim::SimCatalog;
pub use traits::{Catalog, CatalogError};
pub use types::{Component, Instrument, Measurand, Sensor, MAX_COMPONENT_ID, MAX_MEASURAND_ID};
