//! manual-rag - 기술 문서 하이브리드 RAG 질의응답
//!
//! SQLite FTS5 키워드 검색과 LanceDB 벡터 검색을 가중 RRF로 결합하고,
//! 검색된 요소의 페이지 전문을 컨텍스트로 LLM 답변을 생성합니다.
//! 컨텍스트가 생성 서비스 한도를 넘으면 검색 폭을 줄여 재시도합니다.

pub mod cli;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod prompts;

// Re-exports
pub use config::{FusionWeights, RagConfig, ShrinkPolicy};
pub use document::{Element, ElementStore, ElementType, Page, PageStore};
pub use embedding::{EmbeddingProvider, GeminiEmbedding};
pub use engine::evaluate::{EvaluationSummary, Evaluator, Judge, LlmJudge};
pub use engine::{AdaptiveController, Answer, GenerationPolicy};
pub use error::{RagError, Result};
pub use ingest::{Corpus, IngestPipeline, IngestReport, Manifest, Workspace};
pub use knowledge::{
    assemble, HybridRetriever, LanceVectorIndex, LexicalIndex, MemoryVectorIndex, Ranked,
    RankedRetriever, RetrievalResult, RetrievalSource,
};
pub use llm::{ChatCompletionClient, Generator};
