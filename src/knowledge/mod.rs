//! Knowledge 모듈 - 하이브리드 검색과 컨텍스트 조립
//!
//! - Lexical: 인메모리 SQLite FTS5 (BM25)
//! - Lance: LanceDB 영구 벡터 인덱스
//! - Vector: 코사인 유사도 + 인메모리 벡터 인덱스
//! - Hybrid: 가중 RRF로 두 검색 결과 통합
//! - Context: 검색 요소 -> 페이지 컨텍스트

mod context;
mod hybrid;
mod lance;
mod lexical;
mod ranking;
mod vector;

// Re-exports
pub use context::{assemble, context_blocks, render, ContextBlock, UNKNOWN_CONTENT};
pub use hybrid::{fuse, HybridRetriever, RetrievalResult, RetrievalSource};
pub use lance::{BootstrapOutcome, LanceVectorIndex};
pub use lexical::LexicalIndex;
pub use ranking::{Ranked, RankedRetriever};
pub use vector::{cosine_similarity, MemoryVectorIndex};
