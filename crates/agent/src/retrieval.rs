use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub const NO_RESULTS_PLACEHOLDER: &str =
    "No relevant information found in the knowledge base for this query.";
pub const UNAVAILABLE_PLACEHOLDER: &str = "Context retrieval temporarily unavailable.";

#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedDocument {
    pub content: String,
    pub score: f32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("semantic retrieval failed: {0}")]
pub struct RetrievalError(pub String);

/// Similarity search over the reference documents (plans, coverage, FAQs).
#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    /// At most `top_k` documents scoring at least `threshold`, best first.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError>;
}

/// Used when no document store is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRetriever;

#[async_trait]
impl SemanticRetriever for NoopRetriever {
    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
        _threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Fixed result set, filtered and ranked like a real store would.
#[derive(Clone, Debug, Default)]
pub struct StaticRetriever {
    documents: Vec<RetrievedDocument>,
    failure: Option<RetrievalError>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self { documents, failure: None }
    }

    pub fn failing(error: RetrievalError) -> Self {
        Self { documents: Vec::new(), failure: Some(error) }
    }
}

#[async_trait]
impl SemanticRetriever for StaticRetriever {
    async fn search(
        &self,
        _query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut hits: Vec<RetrievedDocument> =
            self.documents.iter().filter(|document| document.score >= threshold).cloned().collect();
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Reference text for the prompt. Never fails the turn: an empty result or a
/// retrieval error degrades to a placeholder.
pub async fn reference_text(
    retriever: &dyn SemanticRetriever,
    query: &str,
    top_k: usize,
    threshold: f32,
) -> String {
    match retriever.search(query, top_k, threshold).await {
        Ok(documents) if documents.is_empty() => NO_RESULTS_PLACEHOLDER.to_string(),
        Ok(documents) => documents
            .into_iter()
            .map(|document| document.content)
            .collect::<Vec<_>>()
            .join("\n\n"),
        Err(error) => {
            warn!(event_name = "agent.retrieval.failed", error = %error, "using degraded context");
            UNAVAILABLE_PLACEHOLDER.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        reference_text, NoopRetriever, RetrievalError, RetrievedDocument, StaticRetriever,
        NO_RESULTS_PLACEHOLDER, UNAVAILABLE_PLACEHOLDER,
    };

    fn doc(content: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument { content: content.to_string(), score }
    }

    #[tokio::test]
    async fn hits_are_thresholded_ranked_and_joined() {
        let retriever = StaticRetriever::new(vec![
            doc("Plan básico 5GB", 0.6),
            doc("Irrelevante", 0.2),
            doc("Cobertura nacional", 0.9),
        ]);

        let text = reference_text(&retriever, "planes", 5, 0.5).await;

        assert_eq!(text, "Cobertura nacional\n\nPlan básico 5GB");
    }

    #[tokio::test]
    async fn top_k_caps_the_result() {
        let retriever = StaticRetriever::new(vec![doc("a", 0.9), doc("b", 0.8), doc("c", 0.7)]);

        assert_eq!(reference_text(&retriever, "q", 2, 0.5).await, "a\n\nb");
    }

    #[tokio::test]
    async fn empty_and_failing_stores_degrade_to_placeholders() {
        assert_eq!(reference_text(&NoopRetriever, "q", 5, 0.5).await, NO_RESULTS_PLACEHOLDER);

        let failing = StaticRetriever::failing(RetrievalError("vector store down".to_string()));
        assert_eq!(reference_text(&failing, "q", 5, 0.5).await, UNAVAILABLE_PLACEHOLDER);
    }
}
