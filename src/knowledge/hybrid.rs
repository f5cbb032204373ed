//! 하이브리드 검색 - 키워드 + 벡터 가중 RRF 통합
//!
//! 각 백엔드에서 최대 k개 후보를 받아 가중 RRF(Reciprocal Rank Fusion)로 합칩니다.
//! 후보의 기여도는 `weight / (K + rank + 1)`이며, 두 목록에 모두 있으면 합산됩니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::sync::Arc;

use super::ranking::{Ranked, RankedRetriever};
use crate::config::FusionWeights;
use crate::document::{Element, ElementId, ElementStore};
use crate::error::{RagError, Result};

/// RRF 상수 (높은 순위에 더 많은 가중치)
const RRF_K: f32 = 60.0;

// ============================================================================
// Types
// ============================================================================

/// 후보가 발견된 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    Lexical,
    Vector,
    Both,
}

/// 하이브리드 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub element: Element,
    /// 융합 점수 (높을수록 좋음)
    pub rank_score: f32,
    pub source: RetrievalSource,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    lexical: Arc<dyn RankedRetriever>,
    vector: Arc<dyn RankedRetriever>,
    elements: Arc<ElementStore>,
    weights: FusionWeights,
    degrade_to_lexical: bool,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn RankedRetriever>,
        vector: Arc<dyn RankedRetriever>,
        elements: Arc<ElementStore>,
        weights: FusionWeights,
    ) -> Self {
        Self {
            lexical,
            vector,
            elements,
            weights,
            degrade_to_lexical: false,
        }
    }

    /// 벡터 인덱스 장애 시 키워드 결과만으로 계속할지 설정
    pub fn with_lexical_fallback(mut self, enabled: bool) -> Self {
        self.degrade_to_lexical = enabled;
        self
    }

    /// 최대 k개의 중복 없는 요소를 융합 점수순으로 반환
    ///
    /// 두 백엔드 결과가 모두 부족하면 k개보다 적을 수 있습니다.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let lexical = self.lexical.query(query, k).await?;

        let vector = match self.vector.query(query, k).await {
            Ok(results) => results,
            Err(RagError::IndexUnavailable(reason)) if self.degrade_to_lexical => {
                tracing::warn!(
                    "{} unavailable ({}), continuing with {} only",
                    self.vector.name(),
                    reason,
                    self.lexical.name()
                );
                vec![]
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            "Retrieved {} {} / {} {} candidates for k={}",
            lexical.len(),
            self.lexical.name(),
            vector.len(),
            self.vector.name(),
            k
        );

        Ok(fuse(&lexical, &vector, self.weights, &self.elements, k))
    }

    pub fn elements(&self) -> &ElementStore {
        &self.elements
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// 가중 RRF 융합
///
/// 정렬: 점수 내림차순, 동점은 페이지 번호 오름차순, 그다음 요소 ID 오름차순.
/// 저장소에 없는 ID는 버립니다.
pub fn fuse(
    lexical: &[Ranked],
    vector: &[Ranked],
    weights: FusionWeights,
    elements: &ElementStore,
    k: usize,
) -> Vec<RetrievalResult> {
    // element_id -> (score, in_lexical, in_vector)
    let mut scores: HashMap<ElementId, (f32, bool, bool)> = HashMap::new();

    for (rank, hit) in lexical.iter().enumerate() {
        let entry = scores.entry(hit.element_id).or_insert((0.0, false, false));
        if !entry.1 {
            entry.0 += weights.lexical / (RRF_K + rank as f32 + 1.0);
            entry.1 = true;
        }
    }

    for (rank, hit) in vector.iter().enumerate() {
        let entry = scores.entry(hit.element_id).or_insert((0.0, false, false));
        if !entry.2 {
            entry.0 += weights.vector / (RRF_K + rank as f32 + 1.0);
            entry.2 = true;
        }
    }

    let mut results: Vec<RetrievalResult> = scores
        .into_iter()
        .filter_map(|(id, (score, in_lexical, in_vector))| {
            let Some(element) = elements.get(id) else {
                tracing::debug!("Dropping unknown element id {} from fusion", id);
                return None;
            };
            let source = match (in_lexical, in_vector) {
                (true, true) => RetrievalSource::Both,
                (true, false) => RetrievalSource::Lexical,
                _ => RetrievalSource::Vector,
            };
            Some(RetrievalResult {
                element: element.clone(),
                rank_score: score,
                source,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.rank_score
            .total_cmp(&a.rank_score)
            .then_with(|| a.element.page_number.cmp(&b.element.page_number))
            .then_with(|| a.element.id.cmp(&b.element.id))
    });
    results.truncate(k);
    results
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;

    use super::*;
    use crate::document::ElementType;

    /// 고정 순위를 돌려주는 백엔드
    struct Fixed(Vec<ElementId>);

    #[async_trait]
    impl RankedRetriever for Fixed {
        async fn query(&self, _text: &str, top_n: usize) -> Result<Vec<Ranked>> {
            Ok(self
                .0
                .iter()
                .take(top_n)
                .enumerate()
                .map(|(i, &id)| Ranked {
                    element_id: id,
                    score: 1.0 / (i as f32 + 1.0),
                })
                .collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct Down;

    #[async_trait]
    impl RankedRetriever for Down {
        async fn query(&self, _text: &str, _top_n: usize) -> Result<Vec<Ranked>> {
            Err(RagError::IndexUnavailable("connection refused".into()))
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    fn store(n: i64) -> Arc<ElementStore> {
        Arc::new(
            ElementStore::from_parts(
                (0..n).map(|i| ((i / 2 + 1) as u32, ElementType::Text, format!("element {}", i))),
            )
            .unwrap(),
        )
    }

    fn ranked(ids: &[ElementId]) -> Vec<Ranked> {
        ids.iter()
            .map(|&id| Ranked {
                element_id: id,
                score: 0.0,
            })
            .collect()
    }

    fn retriever(lexical: Vec<ElementId>, vector: Vec<ElementId>, n: i64) -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(Fixed(lexical)),
            Arc::new(Fixed(vector)),
            store(n),
            FusionWeights::default(),
        )
    }

    #[tokio::test]
    async fn test_at_most_k_unique() {
        let r = retriever(vec![0, 1, 2, 3, 4, 5], vec![5, 4, 3, 9, 8, 7], 10);
        for k in 0..12 {
            let results = r.retrieve("q", k).await.unwrap();
            assert!(results.len() <= k);
            let ids: HashSet<ElementId> = results.iter().map(|r| r.element.id).collect();
            assert_eq!(ids.len(), results.len());
        }
    }

    #[tokio::test]
    async fn test_fewer_than_k_is_not_error() {
        let r = retriever(vec![0], vec![0], 4);
        let results = r.retrieve("q", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, RetrievalSource::Both);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let r = retriever(vec![3, 1, 2], vec![2, 0, 3], 6);
        let a = r.retrieve("q", 4).await.unwrap();
        let b = r.retrieve("q", 4).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_both_lists_ranks_at_least_as_high() {
        let elements = store(6);
        let weights = FusionWeights::default();
        // 요소 2는 키워드 2위, 벡터 1위
        let lexical = ranked(&[4, 2, 5]);
        let vector = ranked(&[2, 1, 0]);

        let fused = fuse(&lexical, &vector, weights, &elements, 6);
        let pos = |list: &[RetrievalResult], id| list.iter().position(|r| r.element.id == id).unwrap();

        let lexical_only = fuse(&lexical, &[], weights, &elements, 6);
        let vector_only = fuse(&[], &vector, weights, &elements, 6);
        assert!(pos(&fused, 2) <= pos(&lexical_only, 2));
        assert!(pos(&fused, 2) <= pos(&vector_only, 2));
        assert_eq!(fused[0].element.id, 2);
        assert_eq!(fused[0].source, RetrievalSource::Both);

        let single = fuse(&lexical, &[], weights, &elements, 6);
        assert!(fused[0].rank_score > single.iter().find(|r| r.element.id == 2).unwrap().rank_score);
    }

    #[test]
    fn test_ties_broken_by_page_then_id() {
        let elements = store(6);
        // 같은 순위(1위)로 서로 다른 목록에 등장 -> 동점
        let fused = fuse(&ranked(&[5]), &ranked(&[1]), FusionWeights::default(), &elements, 5);
        assert_eq!(fused.len(), 2);
        // 요소 1은 1페이지, 요소 5는 3페이지
        assert_eq!(fused[0].element.id, 1);
        assert_eq!(fused[1].element.id, 5);
    }

    #[test]
    fn test_weights_shift_ranking() {
        let elements = store(4);
        let weights = FusionWeights {
            lexical: 0.9,
            vector: 0.1,
        };
        let fused = fuse(&ranked(&[3]), &ranked(&[0]), weights, &elements, 2);
        assert_eq!(fused[0].element.id, 3);
    }

    #[test]
    fn test_duplicates_within_a_list_count_once_and_unknown_ids_dropped() {
        let elements = store(2);
        let fused = fuse(&ranked(&[1, 1, 42]), &[], FusionWeights::default(), &elements, 5);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].rank_score - 0.5 / 61.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_vector_outage_propagates_without_fallback() {
        let r = HybridRetriever::new(
            Arc::new(Fixed(vec![0])),
            Arc::new(Down),
            store(2),
            FusionWeights::default(),
        );
        assert!(matches!(r.retrieve("q", 3).await, Err(RagError::IndexUnavailable(_))));
    }

    #[tokio::test]
    async fn test_vector_outage_degrades_when_enabled() {
        let r = HybridRetriever::new(
            Arc::new(Fixed(vec![1, 0])),
            Arc::new(Down),
            store(2),
            FusionWeights::default(),
        )
        .with_lexical_fallback(true);
        let results = r.retrieve("q", 3).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.source == RetrievalSource::Lexical));
        assert_eq!(results[0].element.id, 1);
    }
}
