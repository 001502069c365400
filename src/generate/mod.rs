//! Grounded answer generation and citation mapping
//!
//! Builds a numbered source block from the reranked candidates, asks the
//! model to answer only from those sources with inline `[N]` citations, and
//! maps the markers back to their source passages. A model failure degrades
//! to a fallback answer; the request never fails because of the model.

mod llm;

pub use llm::{GeminiClient, LlmClient, LlmError};

use crate::retrieval::Candidate;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Fixed answer when retrieval produced nothing; the model is not invoked
pub const NO_RESULTS_ANSWER: &str =
    "I couldn't find any relevant documents to answer your question.";

const PROMPT_TEMPLATE: &str = "You are an internal knowledge base assistant.\n\
Answer the question ONLY using the context provided below.\n\
If the context does not contain enough information to answer, say \"I don't have enough information to answer this question based on the available documents.\"\n\
\n\
Include citations like [1], [2] referring to the numbered sources below.\n\
Be concise but thorough. Use bullet points where appropriate.\n\
\n\
Question: {question}\n\
\n\
Sources:\n\
{context}\n\
\n\
Answer:";

/// Source text length in the prompt's numbered block
const SOURCE_TEXT_CHARS: usize = 600;
/// Citation preview length
const PREVIEW_CHARS: usize = 300;
/// Fallback answer: top-result excerpt length
const FALLBACK_TEXT_CHARS: usize = 500;
/// Fallback answer: error excerpt length
const FALLBACK_ERROR_CHARS: usize = 200;

/// An inline citation mapped back to its source passage
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// 1-based marker matching the prompt's numbered source list
    pub marker: usize,
    pub doc_title: String,
    pub doc_id: String,
    pub department: String,
    pub chunk_text: String,
}

/// Final output of the generation stage
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Answer generator over an optional LLM client.
///
/// `None` (LLM disabled in configuration) degrades every request to the
/// fallback answer, same as a failing model would.
pub struct AnswerGenerator {
    llm: Option<Arc<dyn LlmClient>>,
    deadline: Duration,
}

impl AnswerGenerator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, deadline: Duration) -> Self {
        Self { llm, deadline }
    }

    /// Generate an answer grounded in the ranked candidates; never fails
    pub async fn generate(&self, question: &str, candidates: &[Candidate]) -> GeneratedAnswer {
        if candidates.is_empty() {
            return GeneratedAnswer {
                answer: NO_RESULTS_ANSWER.to_string(),
                citations: Vec::new(),
            };
        }

        let prompt = build_prompt(question, candidates);

        let answer = match &self.llm {
            Some(llm) => {
                match tokio::time::timeout(self.deadline, llm.generate(&prompt)).await {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => {
                        tracing::warn!("LLM call failed, serving fallback answer: {}", e);
                        fallback_answer(&e.to_string(), candidates)
                    }
                    Err(_) => {
                        tracing::warn!("LLM call exceeded {:?}, serving fallback answer", self.deadline);
                        fallback_answer("deadline exceeded", candidates)
                    }
                }
            }
            None => fallback_answer("LLM disabled in configuration", candidates),
        };

        let citations = parse_citations(&answer, candidates);

        GeneratedAnswer { answer, citations }
    }
}

/// Numbered source block plus the fixed instruction prompt
fn build_prompt(question: &str, candidates: &[Candidate]) -> String {
    let context = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "[{}] ({} - {} dept): {}",
                i + 1,
                c.doc_title,
                c.department,
                truncate_chars(&c.text, SOURCE_TEXT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    PROMPT_TEMPLATE
        .replace("{question}", question)
        .replace("{context}", &context)
}

/// Deterministic degraded answer carrying the top result verbatim
fn fallback_answer(error: &str, candidates: &[Candidate]) -> String {
    let top = &candidates[0];
    format!(
        "[LLM unavailable - showing search results only]\n\n\
         I found {} relevant passages but couldn't generate an AI summary. Error: {}\n\n\
         Top result from '{}':\n{}",
        candidates.len(),
        truncate_chars(error, FALLBACK_ERROR_CHARS),
        top.doc_title,
        truncate_chars(&top.text, FALLBACK_TEXT_CHARS)
    )
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid marker regex"))
}

/// Extract `[N]` markers and map each 1-based marker to its 0-based source
/// candidate; duplicates collapse, markers outside the candidate range are
/// silently dropped
pub fn parse_citations(answer: &str, candidates: &[Candidate]) -> Vec<Citation> {
    let markers: BTreeSet<usize> = marker_pattern()
        .captures_iter(answer)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .collect();

    markers
        .into_iter()
        .filter_map(|marker| {
            let index = marker.checked_sub(1)?;
            let candidate = candidates.get(index)?;
            Some(Citation {
                marker,
                doc_title: candidate.doc_title.clone(),
                doc_id: candidate.doc_id.clone(),
                department: candidate.department.clone(),
                chunk_text: truncate_chars(&candidate.text, PREVIEW_CHARS),
            })
        })
        .collect()
}

/// Char-boundary-safe prefix truncation
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Classification, RetrievalSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedLlm {
        response: std::result::Result<String, ()>,
        calls: AtomicUsize,
    }

    impl CannedLlm {
        fn answering(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(LlmError::Api {
                    status: 503,
                    message: "model overloaded".to_string(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn candidate(title: &str, text: &str) -> Candidate {
        Candidate::new(
            text,
            format!("id-{title}"),
            title,
            "HR",
            Classification::Public,
            Some(0),
            RetrievalSource::Vector,
            0.5,
        )
    }

    fn three_candidates() -> Vec<Candidate> {
        vec![
            candidate("First", "first passage"),
            candidate("Second", "second passage"),
            candidate("Third", "third passage"),
        ]
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let llm = Arc::new(CannedLlm::answering("unused"));
        let generator = AnswerGenerator::new(Some(llm.clone()), Duration::from_secs(5));

        let result = generator.generate("anything?", &[]).await;

        assert_eq!(result.answer, NO_RESULTS_ANSWER);
        assert!(result.citations.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn citation_mapping_drops_out_of_range_markers() {
        let llm = Arc::new(CannedLlm::answering("See [2] and also [99]."));
        let generator = AnswerGenerator::new(Some(llm), Duration::from_secs(5));

        let result = generator.generate("question?", &three_candidates()).await;

        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].marker, 2);
        assert_eq!(result.citations[0].doc_title, "Second");
        assert_eq!(result.citations[0].chunk_text, "second passage");
    }

    #[tokio::test]
    async fn duplicate_markers_collapse_and_sort() {
        let llm = Arc::new(CannedLlm::answering("[3] then [1], [3] again [1]"));
        let generator = AnswerGenerator::new(Some(llm), Duration::from_secs(5));

        let result = generator.generate("question?", &three_candidates()).await;

        let markers: Vec<usize> = result.citations.iter().map(|c| c.marker).collect();
        assert_eq!(markers, vec![1, 3]);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_fallback() {
        let llm = Arc::new(CannedLlm::failing());
        let generator = AnswerGenerator::new(Some(llm), Duration::from_secs(5));

        let result = generator.generate("question?", &three_candidates()).await;

        assert!(result.answer.contains("LLM unavailable"));
        assert!(result.answer.contains("3 relevant passages"));
        assert!(result.answer.contains("model overloaded"));
        assert!(result.answer.contains("first passage"));
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn disabled_llm_degrades_to_fallback() {
        let generator = AnswerGenerator::new(None, Duration::from_secs(5));

        let result = generator.generate("question?", &three_candidates()).await;
        assert!(result.answer.contains("LLM unavailable"));
    }

    #[test]
    fn prompt_truncates_source_text() {
        let long_text = "x".repeat(1000);
        let candidates = vec![candidate("Long", &long_text)];

        let prompt = build_prompt("q?", &candidates);

        assert!(prompt.contains(&"x".repeat(600)));
        assert!(!prompt.contains(&"x".repeat(601)));
        assert!(prompt.contains("[1] (Long - HR dept)"));
    }

    #[test]
    fn citation_preview_is_truncated() {
        let long_text = "y".repeat(1000);
        let candidates = vec![candidate("Long", &long_text)];

        let citations = parse_citations("cites [1]", &candidates);
        assert_eq!(citations[0].chunk_text.chars().count(), 300);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let truncated = truncate_chars(&text, 300);
        assert_eq!(truncated.chars().count(), 300);
    }
}
