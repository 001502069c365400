//! In-process HNSW vector store with a native role filter
//!
//! Points carry a chunk payload; queries apply the role predicate inside the
//! store before truncation, so no unauthorized payload ever crosses the
//! adapter boundary. The underlying graph cannot delete points, so
//! per-document replace tombstones the old payload rows, making stale points
//! unreachable by search.

use crate::retrieval::{Candidate, Classification, RetrievalSource};
use hnsw_rs::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Extra neighbors fetched when a filter is active, so filtered-out points
/// do not starve the result list
const FILTER_OVERSAMPLE: usize = 4;

const MAX_ELEMENTS: usize = 200_000;
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Search failed: {0}")]
    SearchError(String),
}

/// Disjunctive filter: a chunk passes when its `access_roles` intersects
/// `any_of`
#[derive(Debug, Clone)]
pub struct RoleFilter {
    pub any_of: Vec<String>,
}

impl RoleFilter {
    pub fn matches(&self, access_roles: &[String]) -> bool {
        access_roles.iter().any(|r| self.any_of.contains(r))
    }
}

/// Payload stored alongside each vector point
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub text: String,
    pub doc_id: String,
    pub doc_title: String,
    pub department: String,
    pub classification: Classification,
    pub access_roles: Vec<String>,
    pub chunk_index: u64,
}

/// A vector plus its payload, as produced by the ingest pipeline
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// HNSW-backed vector store
///
/// Cosine similarity on 384-dim embeddings. Shared freely after
/// construction; mutation happens only through `upsert_document`.
pub struct VectorStore {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    payloads: RwLock<HashMap<usize, ChunkPayload>>,
    doc_points: RwLock<HashMap<String, Vec<usize>>>,
    next_id: AtomicUsize,
    dimension: usize,
}

impl VectorStore {
    pub fn new(dimension: usize, ef_construction: usize, m: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            MAX_ELEMENTS,
            MAX_LAYERS,
            ef_construction,
            DistCosine,
        );

        Self {
            index: RwLock::new(index),
            payloads: RwLock::new(HashMap::new()),
            doc_points: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            dimension,
        }
    }

    /// Replace every point for `doc_id` with the given points.
    ///
    /// Old payloads are tombstoned first, then the new points inserted; a
    /// concurrent search sees either the old or the new set, never a mix of
    /// reachable stale text.
    pub fn upsert_document(
        &self,
        doc_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<usize, VectorStoreError> {
        for point in &points {
            if point.vector.len() != self.dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: self.dimension,
                    actual: point.vector.len(),
                });
            }
        }

        {
            let mut doc_points = self.doc_points.write().unwrap();
            let mut payloads = self.payloads.write().unwrap();
            if let Some(stale) = doc_points.remove(doc_id) {
                for id in stale {
                    payloads.remove(&id);
                }
            }
        }

        let count = points.len();
        let mut ids = Vec::with_capacity(count);

        {
            let index = self.index.write().unwrap();
            let mut payloads = self.payloads.write().unwrap();
            for point in points {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                index.insert((&point.vector, id));
                payloads.insert(id, point.payload);
                ids.push(id);
            }
        }

        self.doc_points
            .write()
            .unwrap()
            .insert(doc_id.to_string(), ids);

        Ok(count)
    }

    /// Search by query vector, ranked by descending cosine similarity.
    ///
    /// With a filter present the graph search oversamples, the role predicate
    /// runs per hit, and the surviving hits are truncated to `limit`. At most
    /// `limit` candidates; an empty result is valid.
    pub fn search(
        &self,
        query: &[f32],
        filter: Option<&RoleFilter>,
        limit: usize,
        ef_search: usize,
    ) -> Result<Vec<Candidate>, VectorStoreError> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if limit == 0 {
            return Ok(Vec::new());
        }

        let k = if filter.is_some() {
            limit * FILTER_OVERSAMPLE
        } else {
            limit
        };

        let neighbours = {
            let index = self.index.read().unwrap();
            index.search(query, k, ef_search.max(k))
        };

        let payloads = self.payloads.read().unwrap();
        let mut results = Vec::new();

        for neighbour in neighbours {
            // Tombstoned points have no payload
            let Some(payload) = payloads.get(&neighbour.d_id) else {
                continue;
            };

            if let Some(filter) = filter {
                if !filter.matches(&payload.access_roles) {
                    continue;
                }
            }

            results.push(Candidate::new(
                payload.text.clone(),
                payload.doc_id.clone(),
                payload.doc_title.clone(),
                payload.department.clone(),
                payload.classification,
                Some(payload.chunk_index),
                RetrievalSource::Vector,
                1.0 - neighbour.distance,
            ));

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    /// Number of live (non-tombstoned) points
    pub fn len(&self) -> usize {
        self.payloads.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
