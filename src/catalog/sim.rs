//! Simulated instrument catalog.
//!
//! Stands in for the serial instrument layer so the binary and the tests
//! can exercise the full collection lifecycle without hardware. Values are
//! deterministic (a per-catalog sequence counter), timestamps are real.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;

use super::traits::{Catalog, CatalogError};
use super::types::{Component, Instrument, Measurand, Sensor};

/// An in-memory catalog with synthetic values.
pub struct SimCatalog {
    instruments: Vec<Instrument>,
    cycling: HashSet<String>,
    cycles_started: u32,
    cycles_stopped: u32,
    sequence: u64,
}

impl SimCatalog {
    /// Wrap a prebuilt instrument tree.
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self {
            instruments,
            cycling: HashSet::new(),
            cycles_started: 0,
            cycles_stopped: 0,
            sequence: 0,
        }
    }

    /// A small demo cluster: one radon monitor with a gas component and a
    /// climate component.
    pub fn with_demo_cluster() -> Self {
        let gas = Component::new(
            0,
            vec![
                sensor(0, "radon", 10, &["recent", "average"]),
                sensor(1, "thoron", 10, &["recent"]),
            ],
        )
        .expect("demo component 0 is valid");
        let climate = Component::new(
            1,
            vec![
                sensor(0, "temperature", 5, &["recent"]),
                sensor(1, "humidity", 5, &["recent"]),
            ],
        )
        .expect("demo component 1 is valid");
        let instrument =
            Instrument::new("j2hRuRDy", vec![gas, climate]).expect("demo instrument is valid");
        Self::new(vec![instrument])
    }

    /// Whether the instrument's sampling cycle is currently running.
    pub fn is_cycling(&self, instrument_id: &str) -> bool {
        self.cycling.contains(instrument_id)
    }

    /// How many cycles have been started since construction.
    pub fn cycles_started(&self) -> u32 {
        self.cycles_started
    }

    /// How many cycles have been stopped since construction.
    pub fn cycles_stopped(&self) -> u32 {
        self.cycles_stopped
    }

    fn instrument_mut(&mut self, id: &str) -> Result<&mut Instrument, CatalogError> {
        self.instruments
            .iter_mut()
            .find(|i| i.id() == id)
            .ok_or_else(|| CatalogError::UnknownInstrument(id.to_string()))
    }

    fn next_value(&mut self) -> f64 {
        self.sequence += 1;
        20.0 + (self.sequence % 40) as f64 * 0.25
    }
}

#[async_trait::async_trait]
impl Catalog for SimCatalog {
    fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    fn synchronize(&mut self, overrides: &HashMap<String, u64>) {
        for instrument in &mut self.instruments {
            for component in instrument.components_mut() {
                for sensor in component.sensors_mut() {
                    if let Some(&secs) = overrides.get(sensor.name()) {
                        if secs == 0 {
                            tracing::warn!(
                                sensor = sensor.name(),
                                "Ignoring zero interval override"
                            );
                            continue;
                        }
                        sensor.set_interval(Duration::from_secs(secs));
                        tracing::debug!(
                            sensor = sensor.name(),
                            seconds = secs,
                            "Interval synchronized"
                        );
                    }
                }
            }
        }
    }

    async fn refresh_value(
        &mut self,
        instrument_id: &str,
        component_idx: usize,
        sensor_idx: usize,
        measurand_idx: usize,
    ) -> Result<Measurand, CatalogError> {
        let value = self.next_value();
        let instrument = self.instrument_mut(instrument_id)?;
        let component =
            instrument
                .component_mut(component_idx)
                .ok_or(CatalogError::IndexOutOfRange {
                    kind: "component",
                    index: component_idx,
                })?;
        let sensor = component
            .sensor_mut(sensor_idx)
            .ok_or(CatalogError::IndexOutOfRange {
                kind: "sensor",
                index: sensor_idx,
            })?;
        let measurand =
            sensor
                .measurand_mut(measurand_idx)
                .ok_or(CatalogError::IndexOutOfRange {
                    kind: "measurand",
                    index: measurand_idx,
                })?;
        measurand.record(value, Utc::now());
        Ok(measurand.clone())
    }

    async fn start_cycle(&mut self, instrument_id: &str) -> Result<(), CatalogError> {
        self.instrument_mut(instrument_id)?;
        self.cycling.insert(instrument_id.to_string());
        self.cycles_started += 1;
        Ok(())
    }

    async fn stop_cycle(&mut self, instrument_id: &str) -> Result<(), CatalogError> {
        self.instrument_mut(instrument_id)?;
        self.cycling.remove(instrument_id);
        self.cycles_stopped += 1;
        Ok(())
    }
}

fn sensor(id: u8, name: &str, interval_secs: u64, measurands: &[&str]) -> Sensor {
    let measurands = measurands
        .iter()
        .enumerate()
        .map(|(idx, name)| Measurand::new(idx as u8, *name).expect("demo measurand id in range"))
        .collect();
    Sensor::new(id, name, Duration::from_secs(interval_secs), measurands)
        .expect("demo sensor is valid")
}
