//! LanceDB 벡터 인덱스 - 요소 임베딩의 영구 저장
//!
//! 문서 버전마다 별도 디렉토리(`<version>/vectors.lance`)를 사용합니다.
//! 테이블이 이미 있으면 재구축하지 않습니다 (중복 삽입 방지).
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::ranking::{Ranked, RankedRetriever};
use super::vector::embedding_unavailable;
use crate::document::{Element, ElementStore};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// 요소 벡터 테이블 이름
const TABLE_NAME: &str = "elements";

/// 부트스트랩 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// 새로 구축 (삽입된 벡터 수)
    Created(usize),
    /// 기존 인덱스 재사용 (보유 벡터 수)
    Existing(usize),
}

impl BootstrapOutcome {
    pub fn vector_count(&self) -> usize {
        match self {
            BootstrapOutcome::Created(n) | BootstrapOutcome::Existing(n) => *n,
        }
    }
}

fn lance_err(context: &str, e: impl std::fmt::Display) -> RagError {
    RagError::IndexUnavailable(format!("{}: {}", context, e))
}

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스
pub struct LanceVectorIndex {
    db: Connection,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LanceVectorIndex {
    /// LanceDB 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `embedder` - 요소/질문 임베딩 프로바이더
    pub async fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| RagError::Storage(format!("Invalid path encoding: {:?}", path)))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to connect to LanceDB", e))?;

        Ok(Self { db, embedder })
    }

    fn schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("element_id", DataType::Int64, false),
            Field::new("page_number", DataType::Int32, false),
            Field::new("element_type", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 요소와 임베딩을 Arrow RecordBatch로 변환
    fn to_batch(elements: &[Element], embeddings: &[Vec<f32>], dimension: usize) -> Result<RecordBatch> {
        if elements.is_empty() {
            return Err(RagError::Ingestion("cannot index an empty element store".into()));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(RagError::IndexUnavailable(format!(
                "embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            )));
        }

        let dim = dimension as i32;
        let ids: Vec<i64> = elements.iter().map(|e| e.id).collect();
        let pages: Vec<i32> = elements.iter().map(|e| e.page_number as i32).collect();
        let types: Vec<&str> = elements.iter().map(|e| e.element_type.as_str()).collect();
        let contents: Vec<&str> = elements.iter().map(|e| e.content.as_str()).collect();

        let flat: Vec<f32> = embeddings.iter().flat_map(|e| e.iter().copied()).collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embedding_list = FixedSizeListArray::try_new(
            field,
            dim,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| lance_err("Failed to create embedding array", e))?;

        RecordBatch::try_new(
            Arc::new(Self::schema(dim)),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(Int32Array::from(pages)),
                Arc::new(StringArray::from(types)),
                Arc::new(StringArray::from(contents)),
                Arc::new(embedding_list),
            ],
        )
        .map_err(|e| lance_err("Failed to create RecordBatch", e))
    }

    /// 테이블 존재 여부 (목록 조회 실패는 에러)
    pub async fn exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| lance_err("Failed to list vector tables", e))?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    /// 테이블 삭제 (없었으면 false)
    pub async fn reset(&self) -> Result<bool> {
        if !self.exists().await? {
            return Ok(false);
        }
        self.db
            .drop_table(TABLE_NAME)
            .await
            .map_err(|e| lance_err("Failed to drop vector table", e))?;
        Ok(true)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to open vector table", e))
    }

    /// 인덱스 부트스트랩
    ///
    /// 테이블이 있으면 임베딩 호출 없이 그대로 사용합니다.
    pub async fn bootstrap(&self, store: &ElementStore) -> Result<BootstrapOutcome> {
        if self.exists().await? {
            let count = self.count().await?;
            tracing::info!("Vector index already exists ({} vectors), skipping build", count);
            return Ok(BootstrapOutcome::Existing(count));
        }

        let elements = store.as_slice();
        let texts: Vec<String> = elements.iter().map(|e| e.content.clone()).collect();

        tracing::info!(
            "Embedding {} elements with {}",
            texts.len(),
            self.embedder.name()
        );
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(embedding_unavailable)?;

        let batch = Self::to_batch(elements, &embeddings, self.embedder.dimension())?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.db
            .create_table(TABLE_NAME, batches)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to create vector table", e))?;

        tracing::info!("Vector index created with {} vectors", elements.len());
        Ok(BootstrapOutcome::Created(elements.len()))
    }

    /// 저장된 벡터 수
    pub async fn count(&self) -> Result<usize> {
        if !self.exists().await? {
            return Ok(0);
        }
        self.open_table()
            .await?
            .count_rows(None)
            .await
            .map_err(|e| lance_err("Failed to count rows", e))
    }
}

#[async_trait]
impl RankedRetriever for LanceVectorIndex {
    async fn query(&self, text: &str, top_n: usize) -> Result<Vec<Ranked>> {
        if top_n == 0 {
            return Ok(vec![]);
        }
        if !self.exists().await? {
            return Err(RagError::IndexUnavailable("vector table missing".into()));
        }

        let query_embedding = self
            .embedder
            .embed_query(text)
            .await
            .map_err(embedding_unavailable)?;

        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .vector_search(query_embedding)
            .map_err(|e| lance_err("Failed to create vector search", e))?
            .limit(top_n)
            .execute()
            .await
            .map_err(|e| lance_err("Failed to execute vector search", e))?
            .try_collect()
            .await
            .map_err(|e| lance_err("Failed to read search results", e))?;

        let mut ranked = Vec::new();
        for batch in batches {
            let ids = batch
                .column_by_name("element_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| RagError::Storage("Missing element_id column".into()))?;

            // _distance 컬럼은 LanceDB가 자동 추가
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| RagError::Storage("Missing _distance column".into()))?;

            for i in 0..batch.num_rows() {
                ranked.push(Ranked {
                    element_id: ids.value(i),
                    score: 1.0 / (1.0 + distances.value(i)),
                });
            }
        }

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.element_id.cmp(&b.element_id))
        });
        ranked.truncate(top_n);
        Ok(ranked)
    }

    fn name(&self) -> &str {
        "lancedb"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionWeights;
    use crate::document::ElementType;
    use crate::embedding::testing::{FailingEmbedding, KeywordEmbedding};
    use crate::knowledge::{HybridRetriever, LexicalIndex, RetrievalSource};
    use tempfile::TempDir;

    fn store() -> ElementStore {
        ElementStore::from_parts(vec![
            (1, ElementType::Text, "Install the filter.".to_string()),
            (2, ElementType::Text, "Torque spec: 20 Nm.".to_string()),
            (3, ElementType::Table, "Oil filter replacement intervals".to_string()),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.lance");
        let embedder = Arc::new(KeywordEmbedding::new(&["filter", "torque", "oil"]));

        let index = LanceVectorIndex::open(&path, embedder.clone()).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);

        let first = index.bootstrap(&store()).await.unwrap();
        assert_eq!(first, BootstrapOutcome::Created(3));
        let calls_after_build = embedder.calls();

        let reopened = LanceVectorIndex::open(&path, embedder.clone()).await.unwrap();
        let second = reopened.bootstrap(&store()).await.unwrap();
        assert_eq!(second, BootstrapOutcome::Existing(3));
        assert_eq!(reopened.count().await.unwrap(), 3);
        assert_eq!(embedder.calls(), calls_after_build);
    }

    #[tokio::test]
    async fn test_query_returns_nearest_element() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(KeywordEmbedding::new(&["filter", "torque", "oil"]));
        let index = LanceVectorIndex::open(&dir.path().join("v.lance"), embedder)
            .await
            .unwrap();
        index.bootstrap(&store()).await.unwrap();

        let results = index.query("torque", 2).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        assert_eq!(results[0].element_id, 1);
    }

    #[tokio::test]
    async fn test_query_before_build_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(KeywordEmbedding::new(&["filter"]));
        let index = LanceVectorIndex::open(&dir.path().join("v.lance"), embedder)
            .await
            .unwrap();
        assert!(matches!(
            index.query("filter", 5).await,
            Err(RagError::IndexUnavailable(_))
        ));
        assert!(index.query("filter", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_fails_hybrid_unless_fallback() {
        let dir = TempDir::new().unwrap();
        let elements = Arc::new(store());
        let embedder = Arc::new(KeywordEmbedding::new(&["filter", "torque", "oil"]));
        let lexical = Arc::new(LexicalIndex::build(elements.iter()).unwrap());
        let vector = Arc::new(
            LanceVectorIndex::open(&dir.path().join("v.lance"), embedder)
                .await
                .unwrap(),
        );

        let strict = HybridRetriever::new(
            lexical.clone(),
            vector.clone(),
            elements.clone(),
            FusionWeights::default(),
        );
        assert!(matches!(
            strict.retrieve("torque", 5).await,
            Err(RagError::IndexUnavailable(_))
        ));

        let degraded = HybridRetriever::new(lexical, vector, elements, FusionWeights::default())
            .with_lexical_fallback(true);
        let results = degraded.retrieve("torque", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].element.id, 1);
        assert_eq!(results[0].source, RetrievalSource::Lexical);
    }

    #[tokio::test]
    async fn test_reset_drops_table() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(KeywordEmbedding::new(&["filter", "torque", "oil"]));
        let index = LanceVectorIndex::open(&dir.path().join("v.lance"), embedder.clone())
            .await
            .unwrap();
        assert!(!index.reset().await.unwrap());

        index.bootstrap(&store()).await.unwrap();
        assert!(index.reset().await.unwrap());
        assert!(!index.exists().await.unwrap());
        assert_eq!(index.bootstrap(&store()).await.unwrap(), BootstrapOutcome::Created(3));
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_bootstrap() {
        let dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&dir.path().join("v.lance"), Arc::new(FailingEmbedding))
            .await
            .unwrap();
        let result = index.bootstrap(&store()).await;
        assert!(matches!(result, Err(RagError::IndexUnavailable(_))));
        assert!(!index.exists().await.unwrap());
    }
}
