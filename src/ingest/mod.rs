//! Manifest-driven document ingestion
//!
//! Batch pipeline feeding both retrieval backends: parse, chunk, store
//! metadata, embed and upsert vectors, and index keywords. A document that
//! cannot be parsed is logged and skipped; the batch continues. Re-ingesting
//! a known title reuses its doc_id and replaces its index entries.

mod chunker;
mod parser;

pub use chunker::{chunk_segments, chunk_text};
pub use parser::{parse_document, DocumentFormat, ParseError, Segment};

use crate::error::{Result, SibylError};
use crate::index::{ChunkPayload, VectorPoint};
use crate::retrieval::{access_roles_for, Classification};
use crate::services::ServiceRegistry;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// One document in the ingestion manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub title: String,
    pub department: String,
    pub classification: String,
}

/// Summary of one ingestion run
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents_ingested: usize,
    pub documents_skipped: usize,
    pub chunks_indexed: usize,
}

/// Load the manifest file listing documents to ingest
pub fn load_manifest(manifest_path: &Path) -> Result<Vec<ManifestEntry>> {
    let raw = std::fs::read_to_string(manifest_path).map_err(|e| SibylError::Io {
        source: e,
        context: format!("Failed to read manifest: {:?}", manifest_path),
    })?;

    serde_json::from_str(&raw).map_err(|e| SibylError::Json {
        source: e,
        context: format!("Invalid manifest: {:?}", manifest_path),
    })
}

/// Run the full ingestion pipeline over every manifest entry
pub async fn run(
    registry: &ServiceRegistry,
    documents_dir: &Path,
    manifest_path: &Path,
) -> Result<IngestReport> {
    let manifest = load_manifest(manifest_path)?;
    tracing::info!("Found {} documents in manifest", manifest.len());

    let mut report = IngestReport::default();

    for entry in manifest {
        match ingest_entry(registry, documents_dir, &entry).await {
            Ok(chunk_count) => {
                report.documents_ingested += 1;
                report.chunks_indexed += chunk_count;
            }
            Err(e) => {
                tracing::warn!("Skipping '{}': {}", entry.title, e);
                report.documents_skipped += 1;
            }
        }
    }

    tracing::info!(
        "Ingestion finished: {} documents, {} chunks, {} skipped",
        report.documents_ingested,
        report.chunks_indexed,
        report.documents_skipped
    );

    Ok(report)
}

async fn ingest_entry(
    registry: &ServiceRegistry,
    documents_dir: &Path,
    entry: &ManifestEntry,
) -> Result<usize> {
    let file_path = documents_dir.join(&entry.path);
    if !file_path.exists() {
        return Err(SibylError::Ingest(format!(
            "File not found: {}",
            file_path.display()
        )));
    }

    let segments =
        parse_document(&file_path).map_err(|e| SibylError::Ingest(e.to_string()))?;
    if segments.is_empty() {
        return Err(SibylError::Ingest("No text extracted".to_string()));
    }

    let chunking = &registry.config.chunking;
    let chunks = chunk_segments(&segments, chunking.max_words, chunking.overlap_words);
    if chunks.is_empty() {
        return Err(SibylError::Ingest("No chunks produced".to_string()));
    }

    tracing::info!(
        "[{}] {}: {} segments -> {} chunks",
        entry.department,
        entry.title,
        segments.len(),
        chunks.len()
    );

    let classification = Classification::parse(&entry.classification);

    let (doc_id, existed) = registry.database.upsert_document(
        &entry.title,
        &entry.department,
        classification.as_str(),
        &entry.path,
    )?;
    if existed {
        tracing::info!("Document already known (id={}), re-indexing", doc_id);
    }

    let vectors = embed_chunks(registry, &chunks).await?;

    let access_roles = access_roles_for(classification, &entry.department);
    let points: Vec<VectorPoint> = chunks
        .iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (chunk_text, vector))| VectorPoint {
            vector,
            payload: ChunkPayload {
                text: chunk_text.clone(),
                doc_id: doc_id.clone(),
                doc_title: entry.title.clone(),
                department: entry.department.clone(),
                classification,
                access_roles: access_roles.clone(),
                chunk_index: i as u64,
            },
        })
        .collect();

    registry
        .vector_store
        .upsert_document(&doc_id, points)
        .map_err(|e| SibylError::Ingest(e.to_string()))?;

    registry
        .keyword_index
        .write()
        .await
        .replace_document(
            &doc_id,
            &entry.title,
            &entry.department,
            classification,
            &chunks,
        )
        .map_err(|e| SibylError::Ingest(e.to_string()))?;

    Ok(chunks.len())
}

/// Embed all chunks in batches on the blocking pool
async fn embed_chunks(
    registry: &ServiceRegistry,
    chunks: &[String],
) -> Result<Vec<Vec<f32>>> {
    let batch_size = registry.config.embedding.batch_size;
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size) {
        let embedder = Arc::clone(&registry.embedder);
        let batch = batch.to_vec();

        let embedded = tokio::task::spawn_blocking(move || embedder.embed_batch(&batch))
            .await
            .map_err(|e| SibylError::Ingest(format!("Embedding task failed: {}", e)))?
            .map_err(|e| SibylError::Ingest(e.to_string()))?;

        vectors.extend(embedded);
    }

    Ok(vectors)
}
