//! Instrument tree data model.
//!
//! An [`Instrument`] owns [`Component`]s, which own [`Sensor`]s, which own
//! [`Measurand`]s. Identifier ranges are enforced at construction:
//! components 0..=63, sensors 0..=255, measurands 0..=3, each unique within
//! its parent.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use super::traits::CatalogError;

/// Highest valid component identifier.
pub const MAX_COMPONENT_ID: u8 = 63;

/// Highest valid measurand identifier.
pub const MAX_MEASURAND_ID: u8 = 3;

/// A single named quantity produced by a sensor, with its most recent
/// value and timestamp. Mutated in place on every refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurand {
    id: u8,
    name: String,
    value: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

impl Measurand {
    /// Create a measurand with no value yet.
    ///
    /// # Errors
    /// Returns `CatalogError::InvalidModel` if `id` is outside 0..=3.
    pub fn new(id: u8, name: impl Into<String>) -> Result<Self, CatalogError> {
        if id > MAX_MEASURAND_ID {
            return Err(CatalogError::InvalidModel(format!(
                "measurand id {} out of range 0..={}",
                id, MAX_MEASURAND_ID
            )));
        }
        Ok(Self {
            id,
            name: name.into(),
            value: None,
            timestamp: None,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Record a freshly sampled value.
    pub fn record(&mut self, value: f64, timestamp: DateTime<Utc>) {
        self.value = Some(value);
        self.timestamp = Some(timestamp);
    }
}

impl fmt::Display for Measurand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.value, self.timestamp) {
            (Some(value), Some(ts)) => write!(
                f,
                "{}: {} @ {}",
                self.name,
                value,
                ts.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            (Some(value), None) => write!(f, "{}: {}", self.name, value),
            _ => write!(f, "{}: no value yet", self.name),
        }
    }
}

/// A measuring element with its own polling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    id: u8,
    name: String,
    interval: Duration,
    measurands: Vec<Measurand>,
}

impl Sensor {
    /// Create a sensor.
    ///
    /// # Errors
    /// Returns `CatalogError::InvalidModel` if the interval is zero or the
    /// measurand ids are not unique.
    pub fn new(
        id: u8,
        name: impl Into<String>,
        interval: Duration,
        measurands: Vec<Measurand>,
    ) -> Result<Self, CatalogError> {
        let name = name.into();
        if interval.is_zero() {
            return Err(CatalogError::InvalidModel(format!(
                "sensor '{}' has a zero polling interval",
                name
            )));
        }
        check_unique_ids(
            measurands.iter().map(Measurand::id),
            &format!("measurand ids of sensor '{}'", name),
        )?;
        Ok(Self {
            id,
            name,
            interval,
            measurands,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Override the polling interval (interval synchronization).
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn measurands(&self) -> &[Measurand] {
        &self.measurands
    }

    pub fn measurand_mut(&mut self, idx: usize) -> Option<&mut Measurand> {
        self.measurands.get_mut(idx)
    }
}

/// A logical grouping of sensors within an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    id: u8,
    sensors: Vec<Sensor>,
}

impl Component {
    /// Create a component.
    ///
    /// # Errors
    /// Returns `CatalogError::InvalidModel` if `id` is outside 0..=63 or the
    /// sensor ids are not unique.
    pub fn new(id: u8, sensors: Vec<Sensor>) -> Result<Self, CatalogError> {
        if id > MAX_COMPONENT_ID {
            return Err(CatalogError::InvalidModel(format!(
                "component id {} out of range 0..={}",
                id, MAX_COMPONENT_ID
            )));
        }
        check_unique_ids(
            sensors.iter().map(Sensor::id),
            &format!("sensor ids of component {}", id),
        )?;
        Ok(Self { id, sensors })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn sensor_mut(&mut self, idx: usize) -> Option<&mut Sensor> {
        self.sensors.get_mut(idx)
    }

    pub fn sensors_mut(&mut self) -> impl Iterator<Item = &mut Sensor> {
        self.sensors.iter_mut()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sensors.iter().map(Sensor::name).collect();
        write!(f, "Component {}: {}", self.id, names.join(", "))
    }
}

/// A physical measuring device exposing one or more components.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    id: String,
    components: Vec<Component>,
}

impl Instrument {
    /// Create an instrument.
    ///
    /// # Errors
    /// Returns `CatalogError::InvalidModel` if the component ids are not
    /// unique.
    pub fn new(id: impl Into<String>, components: Vec<Component>) -> Result<Self, CatalogError> {
        let id = id.into();
        check_unique_ids(
            components.iter().map(Component::id),
            &format!("component ids of instrument '{}'", id),
        )?;
        Ok(Self { id, components })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_mut(&mut self, idx: usize) -> Option<&mut Component> {
        self.components.get_mut(idx)
    }

    pub fn components_mut(&mut self) -> impl Iterator<Item = &mut Component> {
        self.components.iter_mut()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Instrument {} with {} component(s)",
            self.id,
            self.components.len()
        )
    }
}

fn check_unique_ids(ids: impl Iterator<Item = u8>, what: &str) -> Result<(), CatalogError> {
    let mut seen = [false; 256];
    for id in ids {
        if seen[id as usize] {
            return Err(CatalogError::InvalidModel(format!(
                "duplicate id {} in {}",
                id, what
            )));
        }
        seen[id as usize] = true;
    }
    Ok(())
}
