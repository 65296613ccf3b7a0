//! Road-state classification of a batch of aggregated samples
//!
//! The pipeline only depends on the `RoadClassifier` trait; any
//! `Fn(&[AggregatedData]) -> String` closure also implements it.

use crate::domain::types::AggregatedData;
use crate::infra::config::Config;

pub const ROAD_NORMAL: &str = "normal";
pub const ROAD_ROUGH: &str = "rough";
pub const ROAD_POTHOLE: &str = "pothole";

/// Derives one categorical label for a whole batch
pub trait RoadClassifier: Send + Sync {
    fn classify(&self, samples: &[AggregatedData]) -> String;
}

impl<F> RoadClassifier for F
where
    F: Fn(&[AggregatedData]) -> String + Send + Sync,
{
    fn classify(&self, samples: &[AggregatedData]) -> String {
        self(samples)
    }
}

/// Labels a batch by its largest vertical deviation from rest
#[derive(Debug, Clone)]
pub struct ZAxisClassifier {
    baseline_z: f64,
    rough_threshold: f64,
    pothole_threshold: f64,
}

impl ZAxisClassifier {
    pub fn new(baseline_z: f64, rough_threshold: f64, pothole_threshold: f64) -> Self {
        Self { baseline_z, rough_threshold, pothole_threshold }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.baseline_z(), config.rough_threshold(), config.pothole_threshold())
    }
}

impl RoadClassifier for ZAxisClassifier {
    fn classify(&self, samples: &[AggregatedData]) -> String {
        let peak = samples
            .iter()
            .map(|s| (s.accelerometer.z - self.baseline_z).abs())
            .fold(0.0_f64, f64::max);

        let label = if peak >= self.pothole_threshold {
            ROAD_POTHOLE
        } else if peak >= self.rough_threshold {
            ROAD_ROUGH
        } else {
            ROAD_NORMAL
        };
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AccelerometerSample, GpsSample, ParkingSample, UserId};
    use chrono::Utc;

    fn sample(z: f64) -> AggregatedData {
        let gps = GpsSample::new(50.45, 30.52);
        AggregatedData {
            accelerometer: AccelerometerSample::new(0.0, 0.0, z),
            gps,
            parking: ParkingSample::new(3.0, gps),
            captured_at: Utc::now(),
            user_id: UserId(1),
        }
    }

    #[test]
    fn test_z_axis_labels() {
        let classifier = ZAxisClassifier::new(16500.0, 1500.0, 4000.0);
        assert_eq!(classifier.classify(&[sample(16510.0), sample(16490.0)]), ROAD_NORMAL);
        assert_eq!(classifier.classify(&[sample(16510.0), sample(18200.0)]), ROAD_ROUGH);
        assert_eq!(classifier.classify(&[sample(12000.0)]), ROAD_POTHOLE);
        assert_eq!(classifier.classify(&[]), ROAD_NORMAL);
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |samples: &[AggregatedData]| format!("n{}", samples.len());
        assert_eq!(classifier.classify(&[sample(0.0), sample(0.0)]), "n2");
    }
}
