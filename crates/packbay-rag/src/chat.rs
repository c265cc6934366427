//! Question answering over ingested documentation.
//!
//! Flow: response cache → hybrid retrieval → generation backend. Backend
//! failures never escape as errors; the caller gets a canned answer with a
//! null source and the HTTP surface stays 200.

use crate::caches::ResponseCache;
use crate::model::ModelClient;
use crate::retrieval::RetrievalEngine;
use crate::Result;
use std::sync::Arc;

/// Answer returned when retrieval finds no usable context.
pub const NO_CONTEXT_ANSWER: &str =
    "No documentation found for that question. Ingest the package first via /force-scrape/{package}.";

/// Answer returned when the generation backend is unavailable.
pub const BACKEND_ERROR_ANSWER: &str =
    "The documentation was found but an answer could not be generated; the model backend is unavailable.";

/// How many retrieved chunks feed the prompt.
const CONTEXT_CHUNKS: usize = 5;

/// One chat result.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub answer: String,
    /// Package name of the top chunk, `"cache"` on a response-cache hit, or
    /// `None` when no context was found.
    pub source: Option<String>,
}

/// Cache-fronted retrieval + generation.
pub struct ChatEngine {
    retrieval: Arc<RetrievalEngine>,
    model: ModelClient,
    response_cache: ResponseCache,
}

impl ChatEngine {
    #[must_use]
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        model: ModelClient,
        response_cache: ResponseCache,
    ) -> Self {
        Self {
            retrieval,
            model,
            response_cache,
        }
    }

    /// Answer `question`. Only store failures propagate as errors; model
    /// failures degrade into canned answers.
    pub async fn answer(&self, question: &str) -> Result<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(ChatAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                source: None,
            });
        }

        if let Some(answer) = self.response_cache.get(question) {
            return Ok(ChatAnswer {
                answer,
                source: Some("cache".to_string()),
            });
        }

        let hits = self.retrieval.search(question, CONTEXT_CHUNKS).await?;
        if hits.is_empty() {
            return Ok(ChatAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                source: None,
            });
        }

        let context = hits
            .iter()
            .map(|hit| format!("[{}] {}", hit.package_name, hit.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Answer the question using only the package documentation excerpts below.\n\n\
             {context}\n\nQuestion: {question}\nAnswer:"
        );

        match self.model.generate(&prompt).await {
            Ok(answer) => {
                // Only real completions are memoized; canned fallbacks are
                // recomputed so a recovered backend can do better.
                self.response_cache.put(question, &answer);
                Ok(ChatAnswer {
                    answer,
                    source: Some(hits[0].package_name.clone()),
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "generation backend failed");
                Ok(ChatAnswer {
                    answer: BACKEND_ERROR_ANSWER.to_string(),
                    source: None,
                })
            }
        }
    }
}
