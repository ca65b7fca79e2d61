//! Density-based clustering (DBSCAN) over projected 2-D points.
//!
//! Labelling follows the classic formulation: a point is a core point when
//! at least `min_samples` points (itself included) lie within `eps`.
//! Clusters are grown from unlabelled core points in input order, so the
//! labels for a fixed input are deterministic. Points reachable from no
//! core point are labelled [`NOISE`].

use rstar::{RTree, primitives::GeomWithData};
use serde::Deserialize;

use super::projection::ProjectedPoint;

pub const NOISE: i32 = -1;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
}

impl DistanceMetric {
    pub fn distance(&self, a: &ProjectedPoint, b: &ProjectedPoint) -> f64 {
        let dx = a.x - b.x;
        let dy = a.y - b.y;
        match self {
            DistanceMetric::Euclidean => (dx * dx + dy * dy).sqrt(),
            DistanceMetric::Manhattan => dx.abs() + dy.abs(),
        }
    }
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dbscan {
    pub eps: f64,
    pub min_samples: usize,
    pub metric: DistanceMetric,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize, metric: DistanceMetric) -> Self {
        Dbscan {
            eps,
            min_samples,
            metric,
        }
    }

    /// Indices of every point within `eps` of each point, itself included,
    /// sorted ascending.
    fn neighbourhoods(&self, points: &[ProjectedPoint]) -> Vec<Vec<usize>> {
        let tree: RTree<IndexedPoint> = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| GeomWithData::new([p.x, p.y], i))
                .collect(),
        );

        // The Manhattan ball sits inside the Euclidean one, so the Euclidean
        // query is a superset for both metrics.
        let eps_2 = self.eps * self.eps;
        points
            .iter()
            .map(|p| {
                let mut neighbours: Vec<usize> = tree
                    .locate_within_distance([p.x, p.y], eps_2)
                    .filter(|candidate| {
                        self.metric.distance(p, &points[candidate.data]) <= self.eps
                    })
                    .map(|candidate| candidate.data)
                    .collect();
                neighbours.sort_unstable();
                neighbours
            })
            .collect()
    }

    /// Returns one label per input point: a cluster id from 0 upwards, or
    /// [`NOISE`].
    pub fn fit_predict(&self, points: &[ProjectedPoint]) -> Vec<i32> {
        let mut labels = vec![NOISE; points.len()];
        if points.is_empty() {
            return labels;
        }

        let neighbourhoods = self.neighbourhoods(points);
        let is_core: Vec<bool> = neighbourhoods
            .iter()
            .map(|n| n.len() >= self.min_samples)
            .collect();

        let mut label = 0;
        let mut stack: Vec<usize> = Vec::new();
        for seed in 0..points.len() {
            if labels[seed] != NOISE || !is_core[seed] {
                continue;
            }
            let mut current = seed;
            loop {
                if labels[current] == NOISE {
                    labels[current] = label;
                    if is_core[current] {
                        stack.extend(
                            neighbourhoods[current]
                                .iter()
                                .copied()
                                .filter(|&j| labels[j] == NOISE),
                        );
                    }
                }
                match stack.pop() {
                    Some(next) => current = next,
                    None => break,
                }
            }
            label += 1;
        }
        labels
    }
}

/// Largest non-noise cluster as `(label, size)`.
///
/// Ties go to the lowest label, i.e. the cluster grown first.
pub fn dominant_cluster(labels: &[i32]) -> Option<(i32, usize)> {
    let cluster_count = labels.iter().copied().max().filter(|&l| l >= 0)? as usize + 1;
    let mut counts = vec![0usize; cluster_count];
    for &label in labels.iter().filter(|&&l| l >= 0) {
        counts[label as usize] += 1;
    }

    let mut best: Option<(i32, usize)> = None;
    for (label, &count) in counts.iter().enumerate() {
        if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((label as i32, count));
        }
    }
    best
}
