//! Approximate index: k-means inverted file over the combined vectors.
//!
//! Build clusters the unit vectors with spherical k-means (dot-product
//! assignment, renormalised centroids), seeded deterministically by
//! striding through the catalog. A query ranks centroids by similarity,
//! probes the closest `probes` lists, and keeps widening one list at a
//! time until at least `k` filtered hits are found or every list has been
//! visited.

use super::{prepare_query, IndexData, IndexEntry, MoveCatalog, MoveFilters, MoveMeta, MoveSearch, ScoredMove};
use crate::embedding;
use crate::error::CoreError;

/// Build and probe parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusteredParams {
    /// Number of lists. `0` picks `sqrt(n)`.
    pub clusters: usize,
    /// Lists probed before widening.
    pub probes: usize,
    pub max_iterations: usize,
}

impl Default for ClusteredParams {
    fn default() -> Self {
        Self {
            clusters: 0,
            probes: 4,
            max_iterations: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusteredMoveIndex {
    data: IndexData,
    centroids: Vec<Vec<f32>>,
    /// Move indices per centroid.
    lists: Vec<Vec<usize>>,
    probes: usize,
}

impl ClusteredMoveIndex {
    pub fn new(catalog: &MoveCatalog, params: ClusteredParams) -> Self {
        let data = IndexData::from_catalog(catalog);
        let n = data.vectors.len();
        let k = match params.clusters {
            0 => (n as f64).sqrt().ceil() as usize,
            c => c,
        }
        .clamp(1, n.max(1));

        let (centroids, assignments) = spherical_kmeans(&data.vectors, k, params.max_iterations);
        let mut lists = vec![Vec::new(); centroids.len()];
        for (i, &c) in assignments.iter().enumerate() {
            lists[c].push(i);
        }

        tracing::debug!(moves = n, clusters = centroids.len(), "Built clustered move index");

        Self {
            data,
            centroids,
            lists,
            probes: params.probes.max(1),
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }
}

impl MoveSearch for ClusteredMoveIndex {
    fn query(
        &self,
        vector: &[f32],
        filters: &MoveFilters,
        k: usize,
    ) -> Result<Vec<ScoredMove>, CoreError> {
        let query = prepare_query(vector)?;
        if k == 0 || self.centroids.is_empty() {
            return Ok(Vec::new());
        }

        let mut order: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| (embedding::dot(&query, centroid), c))
            .collect();
        order.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut candidates = Vec::new();
        let mut filtered_hits = 0usize;
        for (probed, &(_, c)) in order.iter().enumerate() {
            for &i in &self.lists[c] {
                candidates.push(i);
                if filters.matches(&self.data.metas[i]) {
                    filtered_hits += 1;
                }
            }
            if probed + 1 >= self.probes && filtered_hits >= k {
                break;
            }
        }

        Ok(self.data.rank(&query, filters, candidates.into_iter(), k))
    }

    fn get(&self, move_id: &str) -> Option<&MoveMeta> {
        self.data.get(move_id)
    }

    fn len(&self) -> usize {
        self.data.metas.len()
    }

    fn entries(&self) -> Vec<IndexEntry> {
        self.data.entries()
    }
}

/// Spherical k-means. Returns `(centroids, assignment per vector)`.
///
/// Empty clusters keep their previous centroid.
fn spherical_kmeans(data: &[Vec<f32>], k: usize, max_iterations: usize) -> (Vec<Vec<f32>>, Vec<usize>) {
    if data.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let k = k.min(data.len());
    let dim = data[0].len();

    let mut centroids: Vec<Vec<f32>> = (0..k).map(|j| data[j * data.len() / k].clone()).collect();
    let mut assignments = vec![usize::MAX; data.len()];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (i, point) in data.iter().enumerate() {
            let best = nearest(point, &centroids);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, &c) in assignments.iter().enumerate() {
            for (s, v) in sums[c].iter_mut().zip(&data[i]) {
                *s += v;
            }
            counts[c] += 1;
        }
        for (j, sum) in sums.into_iter().enumerate() {
            if counts[j] > 0 {
                let normalised = embedding::l2_normalize(&sum);
                if embedding::l2_norm(&normalised) > 0.0 {
                    centroids[j] = normalised;
                }
            }
        }
    }

    (centroids, assignments)
}

fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (j, c) in centroids.iter().enumerate() {
        let score = embedding::dot(point, c);
        if score > best_score {
            best_score = score;
            best = j;
        }
    }
    best
}
