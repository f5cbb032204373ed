//! 질의 응답 엔진 - 적응형 생성 컨트롤러
//!
//! 한 질문의 처리는 다음 상태를 오갑니다:
//!
//! ```text
//! Retrieving(k) -> Generating(k, context) -> Done
//!                        |
//!                  ContextTooLarge
//!                        v
//!                  Shrinking(k) -> Retrieving(k - step) | Failed
//! ```
//!
//! 검색 폭 k는 질문마다 새로 시작하는 지역 상태이며 줄어들기만 합니다.

pub mod evaluate;

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::config::{RagConfig, ShrinkPolicy};
use crate::document::PageStore;
use crate::error::{RagError, Result};
use crate::knowledge::{assemble, HybridRetriever};
use crate::llm::Generator;
use crate::prompts;

// ============================================================================
// Types
// ============================================================================

/// 생성 정책
#[derive(Debug, Clone)]
pub struct GenerationPolicy {
    pub k_initial: usize,
    pub shrink: ShrinkPolicy,
    pub no_answer_response: String,
    pub answer_language: Option<String>,
}

impl From<&RagConfig> for GenerationPolicy {
    fn from(config: &RagConfig) -> Self {
        Self {
            k_initial: config.k_initial,
            shrink: config.shrink,
            no_answer_response: config.no_answer_response.clone(),
            answer_language: config.answer_language.clone(),
        }
    }
}

/// 생성된 답변
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// 답변에 포함된 `[page_num:N]` 인용 (등장 순서, 중복 제거)
    pub cited_pages: Vec<u32>,
    /// 성공한 검색 폭
    pub width: usize,
    /// 생성 서비스 호출 횟수
    pub attempts: usize,
}

/// 컨트롤러 상태
enum State {
    Retrieving(usize),
    Generating { k: usize, context: String },
    Shrinking { k: usize, error: RagError },
    Done(Answer),
    Failed(RagError),
}

// ============================================================================
// AdaptiveController
// ============================================================================

/// 적응형 생성 컨트롤러
pub struct AdaptiveController {
    retriever: HybridRetriever,
    pages: Arc<PageStore>,
    generator: Arc<dyn Generator>,
    policy: GenerationPolicy,
}

impl AdaptiveController {
    pub fn new(
        retriever: HybridRetriever,
        pages: Arc<PageStore>,
        generator: Arc<dyn Generator>,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            retriever,
            pages,
            generator,
            policy,
        }
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    /// 기본 검색 폭으로 질문에 답변
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.answer_with_width(question, self.policy.k_initial).await
    }

    /// 지정한 초기 검색 폭으로 질문에 답변
    ///
    /// 폭을 바닥까지 줄여도 실패하면 `GenerationExhausted`를 반환합니다.
    /// `ContextTooLarge`가 아닌 실패는 재시도 없이 즉시 전파됩니다.
    pub async fn answer_with_width(&self, question: &str, k_initial: usize) -> Result<Answer> {
        if k_initial == 0 {
            return Err(RagError::Config("retrieval width must be at least 1".into()));
        }

        let mut attempts = 0;
        let mut state = State::Retrieving(k_initial);

        loop {
            state = match state {
                State::Retrieving(k) => {
                    let results = self.retriever.retrieve(question, k).await?;
                    let context = assemble(&results, &self.pages);
                    tracing::debug!(
                        "k={}: {} elements, context {} chars",
                        k,
                        results.len(),
                        context.len()
                    );
                    State::Generating { k, context }
                }

                State::Generating { k, context } => {
                    if context.is_empty() {
                        tracing::info!("No context retrieved, returning no-answer response");
                        State::Done(Answer {
                            text: self.policy.no_answer_response.clone(),
                            cited_pages: vec![],
                            width: k,
                            attempts,
                        })
                    } else {
                        let prompt = prompts::response_prompt(
                            &context,
                            question,
                            &self.policy.no_answer_response,
                            self.policy.answer_language.as_deref(),
                        );
                        attempts += 1;
                        match self.generator.generate(&prompt).await {
                            Ok(text) => State::Done(Answer {
                                cited_pages: extract_citations(&text),
                                text,
                                width: k,
                                attempts,
                            }),
                            Err(error) if error.shrinks_width() => State::Shrinking { k, error },
                            Err(error) => State::Failed(error),
                        }
                    }
                }

                State::Shrinking { k, error } => match self.policy.shrink.next(k) {
                    Some(next) => {
                        tracing::warn!("Generation rejected at k={} ({}), retrying with k={}", k, error, next);
                        State::Retrieving(next)
                    }
                    None => State::Failed(RagError::GenerationExhausted {
                        attempts,
                        last_width: k,
                        source: Box::new(error),
                    }),
                },

                State::Done(answer) => {
                    tracing::info!(
                        "Answered at k={} after {} attempt(s), cited pages {:?}",
                        answer.width,
                        answer.attempts,
                        answer.cited_pages
                    );
                    return Ok(answer);
                }

                State::Failed(error) => return Err(error),
            };
        }
    }
}

static CITATION_RE: OnceLock<Regex> = OnceLock::new();

/// `[page_num:N]` 인용 추출
pub fn extract_citations(text: &str) -> Vec<u32> {
    let re = CITATION_RE
        .get_or_init(|| Regex::new(r"\[page_num:\s*(\d+)\]").expect("static pattern"));
    let mut pages = Vec::new();
    for cap in re.captures_iter(text) {
        if let Ok(n) = cap[1].parse::<u32>() {
            if !pages.contains(&n) {
                pages.push(n);
            }
        }
    }
    pages
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionWeights;
    use crate::document::{ElementStore, ElementType};
    use crate::embedding::testing::KeywordEmbedding;
    use crate::knowledge::{LexicalIndex, MemoryVectorIndex};
    use crate::llm::testing::FnGenerator;

    /// 페이지 하나당 요소 하나인 코퍼스로 컨트롤러 생성
    async fn controller(pages: u32, generator: Arc<FnGenerator>) -> AdaptiveController {
        let elements = Arc::new(
            ElementStore::from_parts(
                (1..=pages).map(|p| (p, ElementType::Text, format!("filter note {}", p))),
            )
            .unwrap(),
        );
        let page_store = Arc::new(PageStore::from_elements(elements.iter()));
        let lexical = Arc::new(LexicalIndex::build(elements.iter()).unwrap());
        let vector = Arc::new(
            MemoryVectorIndex::build(elements.as_slice(), Arc::new(KeywordEmbedding::new(&["filter"])))
                .await
                .unwrap(),
        );
        let retriever = HybridRetriever::new(lexical, vector, elements, FusionWeights::default());
        let policy = GenerationPolicy::from(&RagConfig::default());
        AdaptiveController::new(retriever, page_store, generator, policy)
    }

    /// 프롬프트 안의 페이지 블록 수 (= 이번 시도의 검색 폭)
    fn page_blocks(prompt: &str) -> usize {
        prompt
            .lines()
            .filter(|l| l.starts_with("Page ") && l.contains(": filter note"))
            .count()
    }

    #[tokio::test]
    async fn test_shrinks_until_context_fits() {
        let generator = Arc::new(FnGenerator::new(|prompt| {
            if page_blocks(prompt) > 4 {
                Err(RagError::ContextTooLarge("413".into()))
            } else {
                Ok("Answer [page_num:1]".to_string())
            }
        }));
        let controller = controller(20, generator.clone()).await;

        let answer = controller.answer("filter").await.unwrap();
        assert_eq!(answer.width, 3);
        assert_eq!(answer.attempts, 7);
        assert_eq!(answer.cited_pages, vec![1]);

        let widths: Vec<usize> = generator.prompts().iter().map(|p| page_blocks(p)).collect();
        assert_eq!(widths, vec![15, 13, 11, 9, 7, 5, 3]);
    }

    #[tokio::test]
    async fn test_exhausted_when_never_fits() {
        let generator = Arc::new(FnGenerator::new(|_| {
            Err(RagError::ContextTooLarge("request too large".into()))
        }));
        let controller = controller(20, generator.clone()).await;

        let err = controller.answer_with_width("filter", 14).await.unwrap_err();
        match err {
            RagError::GenerationExhausted {
                attempts,
                last_width,
                source,
            } => {
                // 14, 12, 10, 8, 6, 4, 2
                assert_eq!(attempts, 7);
                assert_eq!(last_width, 2);
                assert!(matches!(*source, RagError::ContextTooLarge(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_from_default_width_reaches_one() {
        let generator = Arc::new(FnGenerator::new(|_| {
            Err(RagError::ContextTooLarge("413".into()))
        }));
        let controller = controller(20, generator.clone()).await;

        let err = controller.answer("filter").await.unwrap_err();
        match err {
            RagError::GenerationExhausted {
                attempts,
                last_width,
                ..
            } => {
                assert_eq!(attempts, 8);
                assert_eq!(last_width, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        let widths: Vec<usize> = generator.prompts().iter().map(|p| page_blocks(p)).collect();
        assert_eq!(widths, vec![15, 13, 11, 9, 7, 5, 3, 1]);
    }

    #[tokio::test]
    async fn test_other_failures_propagate_immediately() {
        let generator = Arc::new(FnGenerator::new(|_| Err(RagError::Generation("HTTP 401".into()))));
        let controller = controller(5, generator.clone()).await;

        let err = controller.answer("filter").await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
        assert_eq!(generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_retrieval_returns_no_answer_without_generation() {
        let generator = Arc::new(FnGenerator::new(|_| Ok("should not be called".into())));
        let empty = AdaptiveController::new(
            HybridRetriever::new(
                Arc::new(LexicalIndex::build(std::iter::empty()).unwrap()),
                Arc::new(
                    MemoryVectorIndex::build(&[], Arc::new(KeywordEmbedding::new(&["x"])))
                        .await
                        .unwrap(),
                ),
                Arc::new(ElementStore::default()),
                FusionWeights::default(),
            ),
            Arc::new(PageStore::default()),
            generator.clone(),
            GenerationPolicy::from(&RagConfig::default()),
        );

        let answer = empty.answer("anything").await.unwrap();
        assert_eq!(answer.text, RagConfig::default().no_answer_response);
        assert_eq!(answer.attempts, 0);
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_zero_width_rejected() {
        let generator = Arc::new(FnGenerator::new(|_| Ok("x".into())));
        let controller = controller(2, generator).await;
        assert!(matches!(
            controller.answer_with_width("filter", 0).await,
            Err(RagError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_answers_from_page_context() {
        let elements = Arc::new(
            ElementStore::from_parts(vec![
                (1, ElementType::Text, "Install the filter.".to_string()),
                (2, ElementType::Text, "Torque spec: 20 Nm.".to_string()),
            ])
            .unwrap(),
        );
        let pages = Arc::new(PageStore::from_elements(elements.iter()));
        let lexical = Arc::new(LexicalIndex::build(elements.iter()).unwrap());
        let vector = Arc::new(
            MemoryVectorIndex::build(
                elements.as_slice(),
                Arc::new(KeywordEmbedding::new(&["filter", "torque"])),
            )
            .await
            .unwrap(),
        );
        let generator = Arc::new(FnGenerator::new(|prompt| {
            if prompt.contains("Page 2: Torque spec: 20 Nm.") {
                Ok("The torque spec is 20 Nm [page_num:2].".into())
            } else {
                Ok("Sorry, I cannot answer this query.".into())
            }
        }));
        let controller = AdaptiveController::new(
            HybridRetriever::new(lexical, vector, elements, FusionWeights::default()),
            pages,
            generator.clone(),
            GenerationPolicy::from(&RagConfig::default()),
        );

        let answer = controller.answer("What is the torque spec?").await.unwrap();
        assert_eq!(answer.cited_pages, vec![2]);
        assert_eq!(answer.width, 15);
        assert_eq!(answer.attempts, 1);

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("Page 2: Torque spec: 20 Nm.\n\nPage 1: Install the filter."));
        assert!(prompt.contains("Question: What is the torque spec?"));
    }

    #[test]
    fn test_extract_citations() {
        assert_eq!(
            extract_citations("See [page_num:54][page_num:78] and [page_num: 54]."),
            vec![54, 78]
        );
        assert!(extract_citations("no citations").is_empty());
    }
}
