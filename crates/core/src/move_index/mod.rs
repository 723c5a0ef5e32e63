//! Filtered similarity search over the move library.
//!
//! Moves are indexed by their combined 1024-d embedding plus categorical
//! metadata. A query filters on the metadata first, then ranks the
//! survivors by cosine similarity. Ties are broken by shorter duration,
//! then lexical `move_id`, so results are fully deterministic.
//!
//! Two implementations share the [`MoveSearch`] trait:
//! [`ExactMoveIndex`] scans every move; [`ClusteredMoveIndex`] probes a
//! k-means inverted file. [`MoveIndexHandle`] holds whichever one is
//! active and swaps it atomically on rebuild.

mod catalog;
mod clustered;
mod exact;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

pub use catalog::{MoveCatalog, MoveEmbedding};
pub use clustered::{ClusteredMoveIndex, ClusteredParams};
pub use exact::ExactMoveIndex;

use crate::categories::{Difficulty, EnergyLevel, Style};
use crate::embedding::{self, COMBINED_DIM};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Metadata filters. `None` matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveFilters {
    pub difficulty: Option<Difficulty>,
    pub energy: Option<EnergyLevel>,
    pub style: Option<Style>,
}

impl MoveFilters {
    pub fn matches(&self, meta: &MoveMeta) -> bool {
        self.difficulty.map_or(true, |d| d == meta.difficulty)
            && self.energy.map_or(true, |e| e == meta.energy)
            && self.style.map_or(true, |s| s == meta.style)
    }
}

/// One query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMove {
    pub move_id: String,
    pub score: f32,
}

/// Categorical metadata carried alongside each indexed vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveMeta {
    pub move_id: String,
    pub difficulty: Difficulty,
    pub energy: EnergyLevel,
    pub style: Style,
    pub duration_seconds: f64,
    pub media_path: String,
}

/// Conformance export row: one per indexed move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub move_id: String,
    pub difficulty: Difficulty,
    pub energy: EnergyLevel,
    pub style: Style,
    pub duration_seconds: f64,
    pub pose_dim: usize,
    pub audio_dim: usize,
    pub text_dim: usize,
    pub pose_norm: f32,
    pub audio_norm: f32,
    pub text_norm: f32,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Read-only filtered nearest-neighbour search.
pub trait MoveSearch: Send + Sync {
    /// Up to `k` moves passing `filters`, best first. An empty result is
    /// not an error; a query of the wrong dimension is.
    fn query(
        &self,
        vector: &[f32],
        filters: &MoveFilters,
        k: usize,
    ) -> Result<Vec<ScoredMove>, CoreError>;

    fn get(&self, move_id: &str) -> Option<&MoveMeta>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every indexed move with its metadata and component norms.
    fn entries(&self) -> Vec<IndexEntry>;
}

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

/// Vectors and metadata shared by both index implementations.
#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub(crate) metas: Vec<MoveMeta>,
    /// Unit-length combined vectors, parallel to `metas`.
    pub(crate) vectors: Vec<Vec<f32>>,
    entries: Vec<IndexEntry>,
    by_id: HashMap<String, usize>,
}

impl IndexData {
    pub(crate) fn from_catalog(catalog: &MoveCatalog) -> Self {
        let moves = catalog.moves();
        let mut metas = Vec::with_capacity(moves.len());
        let mut vectors = Vec::with_capacity(moves.len());
        let mut entries = Vec::with_capacity(moves.len());
        let mut by_id = HashMap::with_capacity(moves.len());

        for (i, m) in moves.iter().enumerate() {
            by_id.insert(m.move_id.clone(), i);
            vectors.push(embedding::l2_normalize(&m.combined()));
            entries.push(IndexEntry {
                move_id: m.move_id.clone(),
                difficulty: m.difficulty,
                energy: m.energy,
                style: m.style,
                duration_seconds: m.duration_seconds,
                pose_dim: m.pose_vector.len(),
                audio_dim: m.audio_vector.len(),
                text_dim: m.text_vector.len(),
                pose_norm: embedding::l2_norm(&m.pose_vector),
                audio_norm: embedding::l2_norm(&m.audio_vector),
                text_norm: embedding::l2_norm(&m.text_vector),
            });
            metas.push(m.meta());
        }

        Self {
            metas,
            vectors,
            entries,
            by_id,
        }
    }

    pub(crate) fn get(&self, move_id: &str) -> Option<&MoveMeta> {
        self.by_id.get(move_id).map(|&i| &self.metas[i])
    }

    pub(crate) fn entries(&self) -> Vec<IndexEntry> {
        self.entries.clone()
    }

    /// Score `candidates` (indices into `metas`) against a unit query and
    /// return the top `k` after filtering.
    pub(crate) fn rank(
        &self,
        query: &[f32],
        filters: &MoveFilters,
        candidates: impl Iterator<Item = usize>,
        k: usize,
    ) -> Vec<ScoredMove> {
        let mut hits: Vec<(f32, usize)> = candidates
            .filter(|&i| filters.matches(&self.metas[i]))
            .map(|i| (embedding::dot(query, &self.vectors[i]), i))
            .collect();

        hits.sort_by(|a, b| self.compare_hits(*a, *b));
        hits.truncate(k);
        hits.into_iter()
            .map(|(score, i)| ScoredMove {
                move_id: self.metas[i].move_id.clone(),
                score,
            })
            .collect()
    }

    /// Score descending, then shorter duration, then `move_id` ascending.
    fn compare_hits(&self, (sa, ia): (f32, usize), (sb, ib): (f32, usize)) -> Ordering {
        let (ma, mb) = (&self.metas[ia], &self.metas[ib]);
        sb.total_cmp(&sa)
            .then_with(|| ma.duration_seconds.total_cmp(&mb.duration_seconds))
            .then_with(|| ma.move_id.cmp(&mb.move_id))
    }
}

/// Validate the query dimension and return a unit-length copy.
pub(crate) fn prepare_query(vector: &[f32]) -> Result<Vec<f32>, CoreError> {
    embedding::check_dimension("query", vector, COMBINED_DIM)?;
    Ok(embedding::l2_normalize(vector))
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Which index implementation to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexKind {
    Exact,
    Clustered(ClusteredParams),
}

/// Shared, swappable reference to the active index.
///
/// Readers take a cheap `Arc` snapshot; a rebuild swaps the pointer so
/// in-flight queries keep using the index they started with.
pub struct MoveIndexHandle {
    inner: RwLock<Arc<dyn MoveSearch>>,
}

impl MoveIndexHandle {
    pub fn new(index: Arc<dyn MoveSearch>) -> Self {
        Self {
            inner: RwLock::new(index),
        }
    }

    /// Build an index of `kind` from `catalog`.
    pub fn build(catalog: &MoveCatalog, kind: IndexKind) -> Arc<dyn MoveSearch> {
        match kind {
            IndexKind::Exact => Arc::new(ExactMoveIndex::new(catalog)),
            IndexKind::Clustered(params) => Arc::new(ClusteredMoveIndex::new(catalog, params)),
        }
    }

    /// Snapshot of the active index.
    pub fn current(&self) -> Arc<dyn MoveSearch> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the active index.
    pub fn swap(&self, index: Arc<dyn MoveSearch>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = index;
    }

    /// Build a new index off to the side, then swap it in.
    pub fn rebuild_from_catalog(&self, catalog: &MoveCatalog, kind: IndexKind) {
        let index = Self::build(catalog, kind);
        let count = index.len();
        self.swap(index);
        tracing::info!(moves = count, ?kind, "Move index rebuilt");
    }
}

impl std::fmt::Debug for MoveIndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveIndexHandle")
            .field("moves", &self.current().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
