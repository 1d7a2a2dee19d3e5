//! Per-record results of one submit call

use std::collections::BTreeMap;

use super::BatchError;
use crate::client::Embedding;

/// How a single record ended up
#[derive(Debug, Clone, Copy)]
pub enum ItemOutcome<'a> {
    /// Excluded by the caller, or nothing to embed
    Skipped,
    /// Vectorized successfully
    Vector(&'a [f32]),
    /// Failed with an error
    Failed(&'a BatchError),
}

/// Vectors and errors addressed by original record index.
///
/// Every index is exactly one of skipped (no vector, no error), successful
/// (vector, no error) or failed (error, no vector).
#[derive(Debug, Default)]
pub struct BatchResult {
    /// One entry per submitted record
    pub vectors: Vec<Option<Embedding>>,

    /// Errors keyed by record index
    pub errors: BTreeMap<usize, BatchError>,
}

impl BatchResult {
    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            vectors: vec![None; len],
            errors: BTreeMap::new(),
        }
    }

    pub(crate) fn set_vector(&mut self, index: usize, vector: Embedding) {
        debug_assert!(!self.errors.contains_key(&index));
        if let Some(slot) = self.vectors.get_mut(index) {
            *slot = Some(vector);
        }
    }

    pub(crate) fn set_error(&mut self, index: usize, error: BatchError) {
        if let Some(slot) = self.vectors.get_mut(index) {
            *slot = None;
            self.errors.insert(index, error);
        }
    }

    /// Number of records the result covers
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Outcome for the record at `index`, `None` when out of range
    pub fn outcome(&self, index: usize) -> Option<ItemOutcome<'_>> {
        let vector = self.vectors.get(index)?;
        Some(match (vector, self.errors.get(&index)) {
            (_, Some(error)) => ItemOutcome::Failed(error),
            (Some(vector), None) => ItemOutcome::Vector(vector),
            (None, None) => ItemOutcome::Skipped,
        })
    }

    /// Outcomes in record order
    pub fn outcomes(&self) -> impl Iterator<Item = ItemOutcome<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.outcome(i))
    }

    pub fn success_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}
