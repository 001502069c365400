//! Tantivy keyword index with BM25 ranking
//!
//! Multi-field index over chunk text and document title. The backend has no
//! array-containment filter, so role enforcement cannot happen here: searches
//! over-fetch `2x limit` raw hits and the permission resolver post-filters
//! them. Department narrowing, when requested, is applied while collecting
//! hits rather than natively.

use crate::retrieval::{Candidate, Classification, RetrievalSource};
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// Tantivy index wrapper over chunk documents
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    chunk_id_field: Field,
    doc_id_field: Field,
    doc_title_field: Field,
    department_field: Field,
    classification_field: Field,
    chunk_index_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Open an existing index at `index_path`, or create a new one
    pub fn new(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if index_path.exists() && index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            Self::create(index_path)
        }
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("chunk_id", STRING | STORED);
        builder.add_text_field("doc_id", STRING | STORED);
        builder.add_text_field("doc_title", TEXT | STORED);
        builder.add_text_field("department", STRING | STORED);
        builder.add_text_field("classification", STRING | STORED);
        builder.add_u64_field("chunk_index", STORED);
        builder.add_text_field("text", TEXT | STORED);
        builder.build()
    }

    fn create(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let schema = Self::schema();
        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::open_handles(index)
    }

    fn load(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::open_handles(index)
    }

    fn open_handles(index: Index) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();

        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };

        let chunk_id_field = field("chunk_id")?;
        let doc_id_field = field("doc_id")?;
        let doc_title_field = field("doc_title")?;
        let department_field = field("department")?;
        let classification_field = field("classification")?;
        let chunk_index_field = field("chunk_index")?;
        let text_field = field("text")?;

        let writer = index
            .writer(50_000_000)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            chunk_id_field,
            doc_id_field,
            doc_title_field,
            department_field,
            classification_field,
            chunk_index_field,
            text_field,
        })
    }

    /// Replace every indexed chunk of `doc_id` with the given chunk texts.
    ///
    /// Delete and re-add happen in one commit, so a search sees either the
    /// old or the new generation.
    pub fn replace_document(
        &mut self,
        doc_id: &str,
        doc_title: &str,
        department: &str,
        classification: Classification,
        chunks: &[String],
    ) -> Result<usize, KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.doc_id_field, doc_id));

        for (i, chunk_text) in chunks.iter().enumerate() {
            let chunk_id = format!("{}_chunk_{}", doc_id, i);
            let document = doc!(
                self.chunk_id_field => chunk_id,
                self.doc_id_field => doc_id,
                self.doc_title_field => doc_title,
                self.department_field => department,
                self.classification_field => classification.as_str(),
                self.chunk_index_field => i as u64,
                self.text_field => chunk_text.as_str(),
            );

            self.writer
                .add_document(document)
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }

        self.commit()?;
        Ok(chunks.len())
    }

    /// Commit pending changes and wait for the reader to catch up
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Search by BM25 over `[text, doc_title]`.
    ///
    /// Over-fetches `2x limit`, drops department mismatches while collecting,
    /// and stops at `limit` kept hits. The returned candidates are raw: role
    /// filtering has NOT happened yet.
    pub fn search(
        &self,
        query: &str,
        department_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Candidate>, KeywordIndexError> {
        let searcher = self.reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.doc_title_field]);
        let parsed = query_parser
            .parse_query(query)
            .map_err(|e| KeywordIndexError::QueryParseError(e.to_string()))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit((limit * 2).max(1)))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::new();
        for (score, doc_address) in top_docs {
            let retrieved: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let str_field = |field: Field| {
                retrieved
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };

            let department = str_field(self.department_field);
            if let Some(wanted) = department_filter {
                if department != wanted {
                    continue;
                }
            }

            let chunk_index = retrieved
                .get_first(self.chunk_index_field)
                .and_then(|v| v.as_u64());

            results.push(Candidate::new(
                str_field(self.text_field),
                str_field(self.doc_id_field),
                str_field(self.doc_title_field),
                department,
                Classification::parse(&str_field(self.classification_field)),
                chunk_index,
                RetrievalSource::Keyword,
                score,
            ));

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    /// Number of indexed chunks
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_with_corpus() -> (TempDir, KeywordIndex) {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("kw")).unwrap();

        index
            .replace_document(
                "doc-hr",
                "Employee Handbook",
                "HR",
                Classification::Public,
                &[
                    "Vacation days accrue monthly for every employee".to_string(),
                    "Expense reports are due at the end of the month".to_string(),
                ],
            )
            .unwrap();

        index
            .replace_document(
                "doc-sales",
                "Sales Playbook",
                "Sales",
                Classification::Restricted,
                &["Commission structure for enterprise deals".to_string()],
            )
            .unwrap();

        (temp, index)
    }

    #[test]
    fn searches_text_field() {
        let (_temp, index) = index_with_corpus();

        let results = index.search("vacation", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "doc-hr");
        assert_eq!(results[0].chunk_index, Some(0));
        assert_eq!(results[0].classification, Classification::Public);
    }

    #[test]
    fn searches_title_field() {
        let (_temp, index) = index_with_corpus();

        let results = index.search("playbook", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_title, "Sales Playbook");
    }

    #[test]
    fn department_filter_applies_while_collecting() {
        let (_temp, index) = index_with_corpus();

        // "month" matches two HR chunks; Sales filter leaves nothing
        let results = index.search("month", Some("Sales"), 10).unwrap();
        assert!(results.is_empty());

        let results = index.search("month", Some("HR"), 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn respects_limit() {
        let (_temp, index) = index_with_corpus();

        let results = index.search("month", None, 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn replace_document_drops_old_chunks() {
        let (_temp, mut index) = index_with_corpus();
        assert_eq!(index.len(), 3);

        index
            .replace_document(
                "doc-hr",
                "Employee Handbook",
                "HR",
                Classification::Public,
                &["Completely new onboarding content".to_string()],
            )
            .unwrap();

        assert_eq!(index.len(), 2);
        assert!(index.search("vacation", None, 10).unwrap().is_empty());
        assert_eq!(index.search("onboarding", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn malformed_query_is_a_parse_error() {
        let (_temp, index) = index_with_corpus();

        let result = index.search("AND OR", None, 10);
        assert!(matches!(result, Err(KeywordIndexError::QueryParseError(_))));
    }

    #[test]
    fn reload_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kw");

        {
            let mut index = KeywordIndex::new(path.clone()).unwrap();
            index
                .replace_document(
                    "d",
                    "Title",
                    "HR",
                    Classification::Public,
                    &["persisted chunk".to_string()],
                )
                .unwrap();
        }

        let index = KeywordIndex::new(path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search("persisted", None, 10).unwrap().len(), 1);
    }
}
