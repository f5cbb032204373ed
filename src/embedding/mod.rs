//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 요소 텍스트는 `RETRIEVAL_DOCUMENT`, 질문은 `RETRIEVAL_QUERY` 태스크로 임베딩합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env(&EmbeddingConfig::default())?;
//! let embedding = embedder.embed_query("What is the torque spec?").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EmbeddingConfig;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서(요소) 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 질문 임베딩 (기본 구현: 문서와 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];
const INITIAL_BACKOFF_MS: u64 = 2000;

/// 임베딩 태스크 타입
#[derive(Debug, Clone, Copy)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(&self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// 요청 간격 조절기
///
/// 분당 요청 수를 고정 간격으로 바꿔 다음 요청 시각을 예약합니다.
#[derive(Debug)]
struct Pacer {
    spacing: Duration,
    next_slot: Option<Instant>,
}

impl Pacer {
    fn per_minute(requests: u32) -> Self {
        Self {
            spacing: Duration::from_secs(60) / requests.max(1),
            next_slot: None,
        }
    }

    /// 예약된 시각까지 대기 후 다음 시각 예약
    async fn wait(&mut self) {
        let now = Instant::now();
        let slot = match self.next_slot {
            Some(slot) if slot > now => {
                tokio::time::sleep_until(slot.into()).await;
                slot
            }
            _ => now,
        };
        self.next_slot = Some(slot + self.spacing);
    }
}

/// 한 번의 요청 결과
enum Outcome {
    Embedded(Vec<f32>),
    /// 재시도 가능한 실패 (429, 전송 오류)
    Retry(anyhow::Error),
}

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
    max_retries: u32,
    pacer: Mutex<Pacer>,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `config` - 모델/차원 설정 (차원은 768, 1536, 3072 중 하나)
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&config.dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be one of {:?}",
                config.dimension,
                SUPPORTED_DIMENSIONS
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            client,
            dimension: config.dimension,
            max_retries: config.max_retries,
            pacer: Mutex::new(Pacer::per_minute(config.requests_per_minute)),
        })
    }

    /// 환경변수의 API 키로 생성
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(get_api_key()?, config)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:embedContent", GEMINI_API_BASE, self.model)
    }

    async fn send_once(&self, request: &EmbedRequest) -> Result<Outcome> {
        self.pacer.lock().await.wait().await;

        // API 키는 URL이 아닌 헤더로 전송
        let response = match self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Ok(Outcome::Retry(anyhow::anyhow!("embedding request failed: {}", e))),
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read embedding response")?;

        if status.is_success() {
            let parsed: EmbedResponse =
                serde_json::from_str(&body).context("Failed to parse embedding response")?;
            return Ok(Outcome::Embedded(parsed.embedding.values));
        }
        if status.as_u16() == 429 {
            return Ok(Outcome::Retry(anyhow::anyhow!("embedding rate limit exceeded (429)")));
        }

        match serde_json::from_str::<GeminiError>(&body) {
            Ok(error) => anyhow::bail!(
                "Gemini API error ({} {}): {}",
                status.as_u16(),
                error.error.status,
                error.error.message
            ),
            Err(_) => anyhow::bail!("Gemini API error ({}): {}", status, body),
        }
    }

    async fn embed_with_task(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task.as_str().to_string(),
            output_dimensionality: Some(self.dimension),
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await? {
                Outcome::Embedded(values) => return Ok(values),
                Outcome::Retry(reason) if attempt < self.max_retries => {
                    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS << attempt);
                    tracing::warn!(
                        "{}, retrying in {:?} ({}/{})",
                        reason,
                        backoff,
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Outcome::Retry(reason) => {
                    return Err(reason.context(format!(
                        "embedding gave up after {} retries",
                        self.max_retries
                    )))
                }
            }
        }
    }
}

/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, TaskType::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, TaskType::Query).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Gemini embedContent는 단건 API이므로 순차 처리 (rate limiter가 조절)
        let mut results = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding element {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// 임베딩 API 키 로드
///
/// 우선순위: `GEMINI_API_KEY` > `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in API_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using embedding API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "Embedding API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// 임베딩 API 키 존재 여부
pub fn has_api_key() -> bool {
    API_KEY_VARS
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

/// 설정에 맞는 임베딩 프로바이더 생성
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder = GeminiEmbedding::from_env(config)?;
    tracing::info!(
        "Using Gemini embedding {} (dimension: {})",
        embedder.model,
        embedder.dimension
    );
    Ok(Arc::new(embedder))
}

// ============================================================================
// Test Doubles
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
