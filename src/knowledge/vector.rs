//! 벡터 유틸리티 및 인메모리 벡터 인덱스
//!
//! 영구 인덱스는 `lance.rs`의 LanceDB 구현을 사용합니다.
//! 인메모리 인덱스는 테스트와 일회성 실행을 위한 전체 탐색(brute force) 구현입니다.

use std::sync::Arc;

use async_trait::async_trait;

use super::ranking::{Ranked, RankedRetriever};
use crate::document::{Element, ElementId};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0, 차원 불일치/영벡터는 0.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 임베딩 실패를 인덱스 장애로 변환
pub(crate) fn embedding_unavailable(e: anyhow::Error) -> RagError {
    RagError::IndexUnavailable(format!("embedding service: {:#}", e))
}

// ============================================================================
// MemoryVectorIndex
// ============================================================================

/// 인메모리 벡터 인덱스
pub struct MemoryVectorIndex {
    entries: Vec<(ElementId, Vec<f32>)>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemoryVectorIndex {
    /// 요소 콘텐츠를 임베딩하여 구축
    pub async fn build(elements: &[Element], embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let texts: Vec<String> = elements.iter().map(|e| e.content.clone()).collect();
        let embeddings = embedder
            .embed_batch(&texts)
            .await
            .map_err(embedding_unavailable)?;

        let entries = elements
            .iter()
            .map(|e| e.id)
            .zip(embeddings)
            .collect();

        Ok(Self { entries, embedder })
    }
}

#[async_trait]
impl RankedRetriever for MemoryVectorIndex {
    async fn query(&self, text: &str, top_n: usize) -> Result<Vec<Ranked>> {
        if top_n == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed_query(text)
            .await
            .map_err(embedding_unavailable)?;

        let mut ranked: Vec<Ranked> = self
            .entries
            .iter()
            .map(|(id, embedding)| Ranked {
                element_id: *id,
                score: cosine_similarity(&query_embedding, embedding),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.element_id.cmp(&b.element_id))
        });
        ranked.truncate(top_n);

        Ok(ranked)
    }

    fn name(&self) -> &str {
        "memory-vector"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ElementStore, ElementType};
    use crate::embedding::testing::{FailingEmbedding, KeywordEmbedding};

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.0001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_memory_index_query() {
        let store = ElementStore::from_parts(vec![
            (1, ElementType::Text, "Install the filter.".to_string()),
            (2, ElementType::Text, "Torque spec: 20 Nm.".to_string()),
        ])
        .unwrap();
        let embedder = Arc::new(KeywordEmbedding::new(&["filter", "torque"]));
        let index = MemoryVectorIndex::build(store.as_slice(), embedder).await.unwrap();

        let results = index.query("torque please", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].element_id, 1);

        assert_eq!(index.query("torque", 1).await.unwrap().len(), 1);
        assert!(index.query("torque", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_index_unavailable() {
        let store = ElementStore::from_parts(vec![(1, ElementType::Text, "x".to_string())]).unwrap();
        let result = MemoryVectorIndex::build(store.as_slice(), Arc::new(FailingEmbedding)).await;
        assert!(matches!(result, Err(RagError::IndexUnavailable(_))));
    }
}
