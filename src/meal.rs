//! Meal composition summary computed from one request's detections.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::detect::Detection;

/// Confidence above which a detection counts as high confidence.
pub const HIGH_CONFIDENCE: f32 = 0.7;
/// Confidence at or above which a detection is at least medium confidence.
pub const MEDIUM_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// Exactly `0.7` is medium, exactly `0.5` is medium.
    pub fn of(confidence: f32) -> Self {
        if confidence > HIGH_CONFIDENCE {
            ConfidenceBand::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfidenceSummary {
    #[serde(rename = "high_confidence")]
    pub high: usize,
    #[serde(rename = "medium_confidence")]
    pub medium: usize,
    #[serde(rename = "low_confidence")]
    pub low: usize,
}

impl ConfidenceSummary {
    fn record(&mut self, band: ConfidenceBand) {
        match band {
            ConfidenceBand::High => self.high += 1,
            ConfidenceBand::Medium => self.medium += 1,
            ConfidenceBand::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Aggregate statistics over one detection sequence. Never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MealSummary {
    pub total_food_items: usize,
    pub unique_food_types: usize,
    pub food_distribution: HashMap<String, usize>,
    pub confidence_summary: ConfidenceSummary,
}

/// Summarize detections in a single pass. Pure and infallible.
pub fn summarize(detections: &[Detection]) -> MealSummary {
    let mut summary = MealSummary::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for detection in detections {
        summary.total_food_items += 1;
        seen.insert(detection.class_name());
        *summary
            .food_distribution
            .entry(detection.class_name().to_string())
            .or_insert(0) += 1;
        summary
            .confidence_summary
            .record(ConfidenceBand::of(detection.confidence()));
    }

    summary.unique_food_types = seen.len();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn det(name: &str, confidence: f32) -> Detection {
        Detection::new(0, name, confidence, [0.0, 0.0, 1.0, 1.0])
    }

    #[test]
    fn empty_input_gives_zero_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary, MealSummary::default());
        assert!(summary.food_distribution.is_empty());
        assert_eq!(summary.confidence_summary.total(), 0);
    }

    #[test]
    fn pork_chop_and_rice_meal() {
        let summary = summarize(&[det("pork chop", 0.8), det("rice", 0.6), det("rice", 0.4)]);
        assert_eq!(summary.total_food_items, 3);
        assert_eq!(summary.unique_food_types, 2);
        assert_eq!(summary.food_distribution.len(), 2);
        assert_eq!(summary.food_distribution["pork chop"], 1);
        assert_eq!(summary.food_distribution["rice"], 2);
        assert_eq!(
            summary.confidence_summary,
            ConfidenceSummary {
                high: 1,
                medium: 1,
                low: 1
            }
        );
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(ConfidenceBand::of(0.7), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.70001), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::of(0.5), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.49999), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(0.0), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(1.0), ConfidenceBand::High);
    }

    #[test]
    fn serializes_band_wire_names() {
        let summary = summarize(&[det("rice", 0.9)]);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["total_food_items"], 1);
        assert_eq!(value["unique_food_types"], 1);
        assert_eq!(value["food_distribution"]["rice"], 1);
        assert_eq!(value["confidence_summary"]["high_confidence"], 1);
        assert_eq!(value["confidence_summary"]["medium_confidence"], 0);
        assert_eq!(value["confidence_summary"]["low_confidence"], 0);
    }

    fn detections() -> impl Strategy<Value = Vec<Detection>> {
        let names = prop::sample::select(vec!["rice", "salmon", "okra", "corn", "class_99"]);
        prop::collection::vec((names, 0.0f32..=1.0), 0..40).prop_map(|items| {
            items
                .into_iter()
                .map(|(name, confidence)| det(name, confidence))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn totals_are_consistent(dets in detections()) {
            let summary = summarize(&dets);
            prop_assert_eq!(summary.total_food_items, dets.len());
            prop_assert_eq!(summary.food_distribution.values().sum::<usize>(), dets.len());
            prop_assert_eq!(summary.confidence_summary.total(), dets.len());
        }

        #[test]
        fn unique_types_match_distinct_names(dets in detections()) {
            let summary = summarize(&dets);
            let distinct: HashSet<&str> = dets.iter().map(|d| d.class_name()).collect();
            prop_assert_eq!(summary.unique_food_types, distinct.len());
            prop_assert_eq!(summary.food_distribution.len(), distinct.len());
        }

        #[test]
        fn bands_partition_by_threshold(dets in detections()) {
            let summary = summarize(&dets);
            let high = dets.iter().filter(|d| d.confidence() > 0.7).count();
            let medium = dets
                .iter()
                .filter(|d| d.confidence() >= 0.5 && d.confidence() <= 0.7)
                .count();
            let low = dets.iter().filter(|d| d.confidence() < 0.5).count();
            prop_assert_eq!(summary.confidence_summary.high, high);
            prop_assert_eq!(summary.confidence_summary.medium, medium);
            prop_assert_eq!(summary.confidence_summary.low, low);
        }
    }
}
