//! Home/work inference for one card's candidate points.
//!
//! Repeated morning/evening swipes concentrate around the card's true home
//! (or work) stop, with occasional other-purpose trips as noise. DBSCAN
//! discards that noise, and only the largest cluster is kept since a card
//! is assumed to have one home and one work location per period.

use std::collections::HashSet;

use super::config::ClusteringConfig;
use super::dbscan::{Dbscan, dominant_cluster};
use super::errors::ClusterError;
use super::projection::{ProjectedPoint, wgs84_to_korea2000};
use super::records::{CandidateSample, CardId, ClusterResult, LocationType, MemberStop};

/// Smallest confidence reported for a non-empty cluster.
const MIN_CONFIDENCE: f64 = 0.01;

fn round_confidence(cluster_size: usize, total: usize) -> f64 {
    let ratio = cluster_size as f64 / total as f64;
    ((ratio * 100.0).round() / 100.0).clamp(MIN_CONFIDENCE, 1.0)
}

#[derive(Clone, Copy, Debug)]
pub struct ClusterClassifier {
    dbscan: Dbscan,
}

impl ClusterClassifier {
    pub fn new(config: &ClusteringConfig) -> Self {
        ClusterClassifier {
            dbscan: Dbscan::new(config.eps, config.min_samples, config.metric),
        }
    }

    /// Runs the dominant-cluster inference for one card and location type.
    ///
    /// `Ok(None)` means "no result": too few samples, no usable coordinates,
    /// or every point was noise.
    pub fn classify(
        &self,
        card_id: &CardId,
        location_type: LocationType,
        samples: &[CandidateSample],
    ) -> Result<Option<ClusterResult>, ClusterError> {
        if let Some(foreign) = samples.iter().find(|s| &s.card_id != card_id) {
            return Err(ClusterError::ForeignSample {
                expected: card_id.clone(),
                found: foreign.card_id.clone(),
            });
        }
        if samples.len() < self.dbscan.min_samples {
            return Ok(None);
        }

        let (kept, points): (Vec<&CandidateSample>, Vec<ProjectedPoint>) = samples
            .iter()
            .filter_map(|s| {
                let point = wgs84_to_korea2000(s.x?, s.y?)?;
                Some((s, point))
            })
            .unzip();
        if points.is_empty() {
            return Ok(None);
        }

        let labels = self.dbscan.fit_predict(&points);
        let Some((main_label, cluster_size)) = dominant_cluster(&labels) else {
            return Ok(None);
        };

        let mut seen = HashSet::new();
        let mut stops = Vec::new();
        for (sample, _) in kept
            .iter()
            .zip(&labels)
            .filter(|(_, label)| **label == main_label)
        {
            if sample.stop.stop_id.is_empty() {
                return Err(ClusterError::MissingStopId(card_id.clone()));
            }
            if seen.insert(&sample.stop) {
                stops.push(MemberStop {
                    stop: sample.stop.clone(),
                    stop_name: sample.stop_name.clone(),
                });
            }
        }

        Ok(Some(ClusterResult {
            card_id: card_id.clone(),
            location_type,
            stops,
            confidence: round_confidence(cluster_size, points.len()),
            cluster_size: cluster_size as u64,
            total_trips: points.len() as u64,
        }))
    }
}
