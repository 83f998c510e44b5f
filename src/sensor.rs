//! Sensor collaborator
//!
//! The connectivity core never reads sensors itself; the host loop samples a
//! [`SensorSource`] once per telemetry cycle and hands the result to
//! [`SessionSupervisor::publish`](crate::supervisor::SessionSupervisor::publish).

use crate::protocol::TelemetrySample;

/// Four synchronous reads; `None` means the reading is unavailable
pub trait SensorSource: Send {
    fn air_temperature_c(&mut self) -> Option<f32>;
    fn air_humidity_pct(&mut self) -> Option<f32>;
    fn soil_moisture_pct(&mut self) -> Option<f32>;
    fn soil_temperature_c(&mut self) -> Option<f32>;
}

/// One set of readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReadings {
    pub air_temp_c: Option<f32>,
    pub air_humidity_pct: Option<f32>,
    pub soil_moisture_pct: Option<f32>,
    pub soil_temp_c: Option<f32>,
}

impl SensorReadings {
    pub fn sample(source: &mut impl SensorSource) -> Self {
        Self {
            air_temp_c: source.air_temperature_c(),
            air_humidity_pct: source.air_humidity_pct(),
            soil_moisture_pct: source.soil_moisture_pct(),
            soil_temp_c: source.soil_temperature_c(),
        }
    }

    pub fn into_sample(self, device_id: &str, timestamp_ms: u64) -> TelemetrySample {
        TelemetrySample {
            device_id: device_id.to_string(),
            timestamp_ms,
            air_temp_c: self.air_temp_c,
            air_humidity_pct: self.air_humidity_pct,
            soil_moisture_pct: self.soil_moisture_pct,
            soil_temp_c: self.soil_temp_c,
        }
    }
}

/// Random readings in plausible greenhouse ranges
#[derive(Debug, Default, Clone)]
pub struct SimulatedSensors;

/// Uniform value in `[low, high]` tenths, with one decimal place
fn tenths(low: u32, high: u32) -> f32 {
    rand::random_range(low..=high) as f32 / 10.0
}

impl SensorSource for SimulatedSensors {
    fn air_temperature_c(&mut self) -> Option<f32> {
        Some(tenths(50, 350))
    }

    fn air_humidity_pct(&mut self) -> Option<f32> {
        Some(tenths(300, 900))
    }

    fn soil_moisture_pct(&mut self) -> Option<f32> {
        Some(rand::random_range(20..=80u32) as f32)
    }

    fn soil_temperature_c(&mut self) -> Option<f32> {
        Some(tenths(100, 300))
    }
}
