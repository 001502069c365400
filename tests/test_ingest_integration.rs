//! Ingestion pipeline tests: manifest-driven batch, skip policy, idempotent
//! re-ingestion

use sibyl::auth::Authenticator;
use sibyl::config::Config;
use sibyl::generate::AnswerGenerator;
use sibyl::index::{EmbeddingError, EmbeddingProvider, KeywordIndex, VectorStore};
use sibyl::services::ServiceRegistry;
use sibyl::storage::Database;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;

const DIM: usize = 32;

struct StubEmbedder;

impl EmbeddingProvider for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0_f32; DIM];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash % DIM as u64) as usize] += 1.0;
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "stub-bag-of-words"
    }
}

fn registry(temp: &TempDir) -> ServiceRegistry {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();
    config.indexing.vector_dim = DIM;
    config.llm.enabled = false;

    let database = Arc::new(Database::new(&temp.path().join("sibyl.db")).unwrap());
    database.seed_roles().unwrap();

    ServiceRegistry::from_parts(
        config,
        database,
        Arc::new(Authenticator::new(b"test-secret", 24)),
        Arc::new(StubEmbedder),
        Arc::new(VectorStore::new(DIM, 200, 16)),
        Arc::new(RwLock::new(
            KeywordIndex::new(temp.path().join("keyword-index")).unwrap(),
        )),
        None,
        AnswerGenerator::new(None, Duration::from_secs(5)),
    )
}

fn write_file(dir: &std::path::Path, name: &str, content: &str) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

fn write_corpus(docs_dir: &std::path::Path) {
    std::fs::create_dir_all(docs_dir).unwrap();

    write_file(
        docs_dir,
        "handbook.md",
        "# Handbook\n\nVacation days accrue monthly.\n\nRemote work needs approval.\n",
    );
    write_file(
        docs_dir,
        "faq.json",
        r#"[{"text": "Expense reports are due monthly"}, {"text": "Badge access is managed by facilities"}]"#,
    );
    // Unsupported format, must be skipped without failing the batch
    write_file(docs_dir, "legacy.docx", "binary-ish content");

    write_file(
        docs_dir,
        "manifest.json",
        r#"[
            {"path": "handbook.md", "title": "Employee Handbook", "department": "HR", "classification": "public"},
            {"path": "faq.json", "title": "Operations FAQ", "department": "HR", "classification": "public"},
            {"path": "legacy.docx", "title": "Legacy Doc", "department": "HR", "classification": "public"},
            {"path": "missing.md", "title": "Ghost Doc", "department": "HR", "classification": "restricted"}
        ]"#,
    );
}

#[tokio::test]
async fn batch_continues_past_unsupported_and_missing_documents() {
    let temp = TempDir::new().unwrap();
    let registry = registry(&temp);

    let docs_dir = temp.path().join("documents");
    write_corpus(&docs_dir);

    let report = sibyl::ingest::run(&registry, &docs_dir, &docs_dir.join("manifest.json"))
        .await
        .unwrap();

    assert_eq!(report.documents_ingested, 2);
    assert_eq!(report.documents_skipped, 2);
    assert!(report.chunks_indexed >= 2);

    assert_eq!(registry.database.stats().unwrap().document_count, 2);
    assert_eq!(registry.vector_store.len() as u64, registry.keyword_index.read().await.len());
}

#[tokio::test]
async fn reingestion_reuses_doc_ids_and_replaces_index_entries() {
    let temp = TempDir::new().unwrap();
    let registry = registry(&temp);

    let docs_dir = temp.path().join("documents");
    write_corpus(&docs_dir);
    let manifest = docs_dir.join("manifest.json");

    sibyl::ingest::run(&registry, &docs_dir, &manifest).await.unwrap();

    let documents_before = registry.database.stats().unwrap().document_count;
    let vectors_before = registry.vector_store.len();
    let keywords_before = registry.keyword_index.read().await.len();

    sibyl::ingest::run(&registry, &docs_dir, &manifest).await.unwrap();

    // Same titles: no duplicate metadata rows, index entries replaced
    assert_eq!(registry.database.stats().unwrap().document_count, documents_before);
    assert_eq!(registry.vector_store.len(), vectors_before);
    assert_eq!(registry.keyword_index.read().await.len(), keywords_before);
}

#[tokio::test]
async fn ingested_chunks_are_searchable() {
    let temp = TempDir::new().unwrap();
    let registry = registry(&temp);

    let docs_dir = temp.path().join("documents");
    write_corpus(&docs_dir);

    sibyl::ingest::run(&registry, &docs_dir, &docs_dir.join("manifest.json"))
        .await
        .unwrap();

    let results = registry
        .keyword_index
        .read()
        .await
        .search("vacation", None, 10)
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].doc_title, "Employee Handbook");
    assert_eq!(results[0].chunk_index, Some(0));
}
