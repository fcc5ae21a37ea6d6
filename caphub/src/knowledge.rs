//! Retrieval seam: the knowledge backend is an external collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HubResult;

/// One retrieval hit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub id: String,
    pub content: String,
    pub score: f64,
}

/// Query interface used by the rag handler. Scoring and indexing semantics
/// belong to the backend.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    async fn query(
        &self,
        query: &str,
        context_ids: &[String],
        top_k: usize,
    ) -> HubResult<Vec<KnowledgeHit>>;
}

/// In-memory corpus with case-insensitive term matching. Test double.
#[derive(Default)]
pub struct MockKnowledge {
    docs: Vec<(String, String)>,
}

impl MockKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc(mut self, id: impl Into<String>, content: impl Into<String>) -> Self {
        self.docs.push((id.into(), content.into()));
        self
    }
}

#[async_trait]
impl KnowledgeBackend for MockKnowledge {
    async fn query(
        &self,
        query: &str,
        context_ids: &[String],
        top_k: usize,
    ) -> HubResult<Vec<KnowledgeHit>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        let mut hits: Vec<KnowledgeHit> = self
            .docs
            .iter()
            .filter(|(id, _)| context_ids.is_empty() || context_ids.contains(id))
            .filter_map(|(id, content)| {
                let haystack = content.to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                (matched > 0).then(|| KnowledgeHit {
                    id: id.clone(),
                    content: content.clone(),
                    score: matched as f64 / terms.len().max(1) as f64,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scores_and_filters_by_context_ids() {
        let kb = MockKnowledge::new()
            .with_doc("a", "billing invoices and refunds")
            .with_doc("b", "shipping times");
        let hits = kb.query("refund invoices", &[], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        let scoped = kb
            .query("shipping", &["a".to_string()], 10)
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let kb = MockKnowledge::new()
            .with_doc("a", "rust async")
            .with_doc("b", "rust sync")
            .with_doc("c", "rust macros");
        let hits = kb.query("rust", &[], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
