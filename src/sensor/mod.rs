//! Sensor module - Measurement source for the periodic report
//!
//! The barrel's fill level is derived from an ultrasonic distance reading:
//! the sensor looks down at the water surface, so a short distance means a
//! full barrel. Calibration maps the raw distance onto a percentage.

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Sensor errors
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Measurement failed: {0}")]
    ReadFailed(String),
}

pub type SensorResult<T> = Result<T, SensorError>;

/// Supplies the value for the periodic METRIC report.
///
/// A failed sample skips that report iteration; it never ends the session.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn sample(&self) -> SensorResult<f64>;
}

/// Mapping from raw sensor distance to fill percentage.
///
/// There is padding in both directions, so even a reading near the span
/// limit still leaves some physical leeway before the barrel runs dry.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    /// Distance from the sensor to the surface when full, in cm
    pub offset_cm: f64,
    /// Additional distance to the surface when empty, in cm
    pub span_cm: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset_cm: 5.0,
            span_cm: 67.0,
        }
    }
}

impl Calibration {
    /// Convert a distance reading to a fill percentage, clamped to [0, 100]
    pub fn fill_percent(&self, distance_cm: f64) -> f64 {
        let fraction = 1.0 - ((distance_cm - self.offset_cm) / self.span_cm);
        (fraction * 100.0).clamp(0.0, 100.0)
    }
}

/// Level source used when no ultrasonic hardware is attached.
///
/// Draws a distance uniformly from the calibrated range and converts it,
/// so reported values exercise the same path as a real sensor.
pub struct SimulatedLevel {
    calibration: Calibration,
}

impl SimulatedLevel {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }
}

#[async_trait]
impl MetricSource for SimulatedLevel {
    async fn sample(&self) -> SensorResult<f64> {
        let lo = self.calibration.offset_cm;
        let hi = lo + self.calibration.span_cm;
        let distance = rand::rng().random_range(lo..hi);
        Ok(self.calibration.fill_percent(distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_barrel_reads_hundred_percent() {
        let cal = Calibration::default();
        assert_eq!(cal.fill_percent(5.0), 100.0);
    }

    #[test]
    fn test_empty_barrel_reads_zero_percent() {
        let cal = Calibration::default();
        assert_eq!(cal.fill_percent(72.0), 0.0);
    }

    #[test]
    fn test_fill_percent_is_clamped() {
        let cal = Calibration::default();
        assert_eq!(cal.fill_percent(1.0), 100.0);
        assert_eq!(cal.fill_percent(200.0), 0.0);
    }

    #[test]
    fn test_half_full() {
        let cal = Calibration {
            offset_cm: 5.0,
            span_cm: 60.0,
        };
        assert!((cal.fill_percent(35.0) - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_simulated_level_stays_in_range() {
        let source = SimulatedLevel::new(Calibration::default());
        for _ in 0..32 {
            let level = source.sample().await.unwrap();
            assert!((0.0..=100.0).contains(&level));
        }
    }
}
