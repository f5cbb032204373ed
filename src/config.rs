//! 설정 모듈
//!
//! JSON 설정 파일(선택)과 CLI 오버라이드로 구성됩니다.
//! 모든 필드에 기본값이 있으므로 빈 `{}` 파일도 유효합니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::document::ElementType;
use crate::error::{RagError, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 (~/.manual-rag/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".manual-rag")
}

// ============================================================================
// Retrieval Policy
// ============================================================================

/// 하이브리드 융합 가중치
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub lexical: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            vector: 0.5,
        }
    }
}

/// 검색 폭 축소 정책
///
/// 시도 순서: `k_initial, k_initial - step, ...`.
/// 폭이 `floor` 이하인 첫 시도가 마지막 시도이며, 폭은 1 미만으로 내려가지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkPolicy {
    pub step: usize,
    pub floor: usize,
}

impl Default for ShrinkPolicy {
    fn default() -> Self {
        Self { step: 2, floor: 2 }
    }
}

impl ShrinkPolicy {
    /// 다음 검색 폭 (더 줄일 수 없으면 None)
    pub fn next(&self, k: usize) -> Option<usize> {
        if k > self.floor {
            Some(k.saturating_sub(self.step).max(1))
        } else {
            None
        }
    }
}

// ============================================================================
// Service Settings
// ============================================================================

/// 임베딩 설정 (Gemini)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    /// 분당 최대 요청 수 (요청 간격으로 환산)
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    /// 429/전송 실패 시 최대 재시도 횟수
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            dimension: 768,
            requests_per_minute: 60,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// LLM 설정 (OpenAI 호환 chat completions, 기본 Groq)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub timeout_secs: u64,
    /// 429 응답 시 최대 재시도 횟수
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.0,
            max_tokens: Some(1024),
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub k_initial: usize,
    pub fusion_weights: FusionWeights,
    /// 벡터 인덱스 장애 시 키워드 검색만으로 계속할지 여부
    pub degrade_to_lexical: bool,
    pub shrink: ShrinkPolicy,
    pub excluded_element_types: Vec<ElementType>,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    /// 컨텍스트가 비었을 때의 고정 응답
    pub no_answer_response: String,
    /// 답변 언어 (예: "German")
    pub answer_language: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            k_initial: 15,
            fusion_weights: FusionWeights::default(),
            degrade_to_lexical: false,
            shrink: ShrinkPolicy::default(),
            excluded_element_types: vec![
                ElementType::Footnote,
                ElementType::PageFooter,
                ElementType::PageHeader,
                ElementType::Caption,
                ElementType::Image,
            ],
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            no_answer_response: "Sorry, I cannot answer this query.".to_string(),
            answer_language: None,
        }
    }
}

impl RagConfig {
    /// JSON 파일에서 로드 후 검증
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| RagError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// 파일이 주어지면 로드, 아니면 기본값
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k_initial == 0 {
            return Err(RagError::Config("k_initial must be at least 1".into()));
        }
        if self.shrink.step == 0 {
            return Err(RagError::Config("shrink.step must be at least 1".into()));
        }
        let w = self.fusion_weights;
        if !(w.lexical >= 0.0 && w.vector >= 0.0) || w.lexical + w.vector <= 0.0 {
            return Err(RagError::Config(format!(
                "fusion_weights must be non-negative and not both zero (got {}/{})",
                w.lexical, w.vector
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding.dimension must be positive".into()));
        }
        if self.embedding.requests_per_minute == 0 {
            return Err(RagError::Config(
                "embedding.requests_per_minute must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// 인덱싱에서 제외할 타입인지
    pub fn is_excluded(&self, element_type: &ElementType) -> bool {
        self.excluded_element_types.contains(element_type)
    }
}

// ============================================================================
// Tests
// ============================================================================
