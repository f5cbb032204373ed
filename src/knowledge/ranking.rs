//! 검색 백엔드 공통 인터페이스
//!
//! 하이브리드 검색기는 구체 타입(FTS5, LanceDB)이 아닌 이 트레이트에만 의존합니다.

use async_trait::async_trait;

use crate::document::ElementId;
use crate::error::Result;

/// 순위가 매겨진 검색 후보 (높은 점수가 더 관련 있음)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    pub element_id: ElementId,
    pub score: f32,
}

/// 순위 검색 백엔드
#[async_trait]
pub trait RankedRetriever: Send + Sync {
    /// 관련도 내림차순으로 최대 `top_n`개 반환
    async fn query(&self, text: &str, top_n: usize) -> Result<Vec<Ranked>>;

    /// 로그용 백엔드 이름
    fn name(&self) -> &str;
}
