//! LLM 모듈 - OpenAI 호환 chat completions 클라이언트
//!
//! 기본 엔드포인트는 Groq입니다. 실패는 컨트롤러가 구분할 수 있도록 분류합니다:
//! - 입력 크기 초과 (413, context length 관련 메시지) -> `ContextTooLarge`
//! - 429 -> 제한된 횟수만큼 지수 백오프 후 재시도
//! - 그 외 -> `Generation`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{RagError, Result};

// ============================================================================
// Generator Trait
// ============================================================================

/// 텍스트 생성 서비스
#[async_trait]
pub trait Generator: Send + Sync {
    /// 프롬프트 하나에 대한 완성 텍스트
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

// ============================================================================
// ChatCompletionClient
// ============================================================================

const INITIAL_BACKOFF_MS: u64 = 2000;

/// 입력 크기 초과를 나타내는 응답 본문 패턴 (소문자 비교)
const OVERFLOW_MARKERS: [&str; 6] = [
    "context_length_exceeded",
    "context length",
    "maximum context",
    "too large",
    "too long",
    "reduce the length",
];

/// OpenAI 호환 chat completions 클라이언트
pub struct ChatCompletionClient {
    api_key: String,
    client: reqwest::Client,
    config: LlmConfig,
}

impl ChatCompletionClient {
    pub fn new(api_key: String, config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            config,
        })
    }

    /// 환경변수의 API 키로 생성
    pub fn from_env(config: LlmConfig) -> Result<Self> {
        Self::new(get_api_key()?, config)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for ChatCompletionClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self
                .client
                .post(&self.config.base_url)
                .bearer_auth(self.api_key.trim())
                .json(&request)
                .send()
                .await
                .map_err(|e| RagError::Generation(format!("request failed: {}", e)))?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| RagError::Generation(format!("failed to read response: {}", e)))?;

            if (200..300).contains(&status) {
                let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
                    RagError::Generation(format!("failed to parse completion: {}", e))
                })?;
                return parsed
                    .choices
                    .into_iter()
                    .find_map(|c| c.message.content)
                    .map(|c| c.trim().to_string())
                    .ok_or_else(|| RagError::Generation("completion had no content".into()));
            }

            if status == 429 && !looks_like_overflow(&body) && attempt < max_retries {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "LLM rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    max_retries
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            return Err(classify_failure(status, &body));
        }

        Err(RagError::Generation(format!(
            "rate limited after {} retries",
            max_retries
        )))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

fn looks_like_overflow(body: &str) -> bool {
    let lower = body.to_lowercase();
    OVERFLOW_MARKERS.iter().any(|m| lower.contains(m))
}

/// HTTP 실패를 에러 분류로 변환
pub fn classify_failure(status: u16, body: &str) -> RagError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 300));
    if status == 413 || ((400..500).contains(&status) && looks_like_overflow(body)) {
        RagError::ContextTooLarge(detail)
    } else {
        RagError::Generation(detail)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

// ============================================================================
// API Key Management
// ============================================================================

const API_KEY_VARS: [&str; 2] = ["GROQ_API_KEY", "LLM_API_KEY"];

/// LLM API 키 로드
///
/// 우선순위: `GROQ_API_KEY` > `LLM_API_KEY`
pub fn get_api_key() -> Result<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.is_empty())
        .ok_or_else(|| RagError::Config("LLM API key not found. Set GROQ_API_KEY or LLM_API_KEY".into()))
}

pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

/// 설정에 맞는 생성기 생성
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    let client = ChatCompletionClient::from_env(config.clone())?;
    tracing::info!("Using LLM {} at {}", config.model, config.base_url);
    Ok(Arc::new(client))
}

// ============================================================================
// Test Doubles
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    type Respond = dyn Fn(&str) -> Result<String> + Send + Sync;

    /// 클로저로 응답하고 받은 프롬프트를 기록하는 생성기
    pub struct FnGenerator {
        respond: Box<Respond>,
        prompts: Mutex<Vec<String>>,
    }

    impl FnGenerator {
        pub fn new<F>(respond: F) -> Self
        where
            F: Fn(&str) -> Result<String> + Send + Sync + 'static,
        {
            Self {
                respond: Box::new(respond),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// 지금까지 받은 프롬프트 (호출 순서)
        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for FnGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.respond)(prompt)
        }

        fn name(&self) -> &str {
            "fn"
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
