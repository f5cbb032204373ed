//! 에러 타입 - RAG 파이프라인 실패 분류
//!
//! 적응형 컨트롤러는 이 분류를 보고 재시도 여부를 결정합니다.
//! `ContextTooLarge`만 검색 폭 축소를 유발하고, 나머지는 즉시 전파됩니다.

use thiserror::Error;

/// 라이브러리 공통 Result
pub type Result<T> = std::result::Result<T, RagError>;

/// RAG 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 문서 파싱/추출 실패 (수집 단계에서 치명적, 재시도 없음)
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// 임베딩 서비스 또는 인덱스 구축 실패
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// 생성 서비스가 입력 크기 초과로 거부
    #[error("context too large for generation service: {0}")]
    ContextTooLarge(String),

    /// 그 외 생성 서비스 실패
    #[error("generation failed: {0}")]
    Generation(String),

    /// 검색 폭을 바닥까지 줄였지만 생성에 실패
    #[error("generation exhausted after {attempts} attempt(s), last width k={last_width}: {source}")]
    GenerationExhausted {
        attempts: usize,
        last_width: usize,
        #[source]
        source: Box<RagError>,
    },

    /// 채점 서비스가 유효한 0/1 점수를 반환하지 않음
    #[error("evaluation scoring failed: {0}")]
    EvaluationScoring(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// 검색 폭을 줄이면 회복될 수 있는 실패인지 여부
    pub fn shrinks_width(&self) -> bool {
        matches!(self, RagError::ContextTooLarge(_))
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

impl From<csv::Error> for RagError {
    fn from(e: csv::Error) -> Self {
        RagError::Storage(format!("csv: {}", e))
    }
}
