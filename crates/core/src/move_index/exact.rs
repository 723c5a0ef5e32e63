use super::{prepare_query, IndexData, IndexEntry, MoveCatalog, MoveFilters, MoveMeta, MoveSearch, ScoredMove};
use crate::error::CoreError;

/// Brute-force index: every query scores every move.
#[derive(Debug, Clone)]
pub struct ExactMoveIndex {
    data: IndexData,
}

impl ExactMoveIndex {
    pub fn new(catalog: &MoveCatalog) -> Self {
        Self {
            data: IndexData::from_catalog(catalog),
        }
    }
}

impl MoveSearch for ExactMoveIndex {
    fn query(
        &self,
        vector: &[f32],
        filters: &MoveFilters,
        k: usize,
    ) -> Result<Vec<ScoredMove>, CoreError> {
        let query = prepare_query(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        Ok(self.data.rank(&query, filters, 0..self.data.metas.len(), k))
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
