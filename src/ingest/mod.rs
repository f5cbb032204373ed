//! 수집 파이프라인 - 문서를 버전별 아티팩트와 인덱스로 변환
//!
//! ```text
//! <data_dir>/
//! ├── active                  # 활성 버전 이름
//! └── <version>/
//!     ├── elements.json       # 요소 (표는 요약으로 교체됨)
//!     ├── pages.json          # 페이지 전문 (표 원문 유지)
//!     ├── table_summaries.json
//!     ├── vectors.lance/
//!     └── manifest.json
//! ```
//!
//! 같은 문서를 다시 수집해도 요약과 임베딩은 새로 만들지 않습니다.

pub mod summary;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RagConfig;
use crate::document::partition::{self, RawElement};
use crate::document::{ElementStore, PageStore};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::knowledge::{BootstrapOutcome, HybridRetriever, LanceVectorIndex, LexicalIndex};
use crate::llm::Generator;

pub use summary::{SummaryCache, SummaryEntry, SummaryStats, TableSummarizer};

const ACTIVE_FILE: &str = "active";

/// 문서 버전 (입력 바이트 SHA-256 앞 16자리)
pub fn document_version(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Workspace
// ============================================================================

/// 데이터 디렉토리
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            RagError::Storage(format!("cannot create data directory {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    pub fn elements_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("elements.json")
    }

    pub fn pages_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("pages.json")
    }

    pub fn summaries_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("table_summaries.json")
    }

    pub fn vectors_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("vectors.lance")
    }

    pub fn manifest_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("manifest.json")
    }

    /// 활성 버전 (없으면 None)
    pub fn active_version(&self) -> Result<Option<String>> {
        let path = self.root.join(ACTIVE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let version = std::fs::read_to_string(&path)?.trim().to_string();
        Ok(Some(version).filter(|v| !v.is_empty()))
    }

    pub fn set_active_version(&self, version: &str) -> Result<()> {
        std::fs::write(self.root.join(ACTIVE_FILE), version)?;
        Ok(())
    }

    /// 매니페스트가 있는 버전 목록 (수집 시각순)
    pub fn versions(&self) -> Result<Vec<Manifest>> {
        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = self.manifest_path(&name);
            if path.exists() {
                manifests.push(Manifest::load(&path)?);
            }
        }
        manifests.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at));
        Ok(manifests)
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// 수집 결과 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub source: String,
    pub element_count: usize,
    pub page_count: usize,
    pub table_count: usize,
    pub vector_count: usize,
    /// 벡터 테이블을 만든 요소 집합의 지문
    #[serde(default)]
    pub fingerprint: String,
    pub ingested_at: DateTime<Utc>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

// ============================================================================
// IngestPipeline
// ============================================================================

/// 수집 결과
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub manifest: Manifest,
    pub summaries: SummaryStats,
    pub vectors: BootstrapOutcome,
    /// 제외 유형이나 빈 텍스트로 버려진 요소 수
    pub skipped: usize,
}

/// 수집 파이프라인
pub struct IngestPipeline {
    workspace: Workspace,
    config: RagConfig,
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IngestPipeline {
    pub fn new(
        workspace: Workspace,
        config: RagConfig,
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            workspace,
            config,
            generator,
            embedder,
        }
    }

    /// 문서 파일 수집
    ///
    /// # Arguments
    /// * `path` - PDF 또는 구조 추출 JSON
    /// * `version` - 버전 이름 (None이면 내용 해시)
    pub async fn ingest(&self, path: &Path, version: Option<String>) -> Result<IngestReport> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::Ingestion(format!("cannot read {}: {}", path.display(), e)))?;
        let version = version.unwrap_or_else(|| document_version(&bytes));
        tracing::info!("Ingesting {:?} as version {}", path, version);

        let owned_path = path.to_path_buf();
        let raw = tokio::task::spawn_blocking(move || partition::partition_bytes(&owned_path, &bytes))
            .await
            .map_err(|e| RagError::Ingestion(format!("partition task failed: {}", e)))??;

        self.ingest_elements(raw, &version, &path.display().to_string())
            .await
    }

    /// 분할된 요소 수집
    pub async fn ingest_elements(
        &self,
        raw: Vec<RawElement>,
        version: &str,
        source: &str,
    ) -> Result<IngestReport> {
        let total = raw.len();
        let kept: Vec<RawElement> = raw
            .into_iter()
            .filter(|e| !self.config.is_excluded(&e.element_type) && !e.text.trim().is_empty())
            .collect();
        let skipped = total - kept.len();
        if kept.is_empty() {
            return Err(RagError::Ingestion(format!(
                "{} has no indexable elements ({} skipped)",
                source, skipped
            )));
        }

        let mut store = ElementStore::from_parts(
            kept.into_iter()
                .map(|e| (e.page_number, e.element_type, e.text)),
        )?;
        let table_count = store.tables().count();
        tracing::info!(
            "{} elements kept ({} tables), {} skipped",
            store.len(),
            table_count,
            skipped
        );

        std::fs::create_dir_all(self.workspace.version_dir(version))?;

        // 페이지는 표 원문을 유지
        let pages = PageStore::from_elements(store.iter());
        pages.save(&self.workspace.pages_path(version))?;

        let summaries = TableSummarizer::new(self.generator.clone())
            .summarize(&mut store, &self.workspace.summaries_path(version))
            .await?;
        store.save(&self.workspace.elements_path(version))?;
        let fingerprint = store.fingerprint();

        let index =
            LanceVectorIndex::open(&self.workspace.vectors_path(version), self.embedder.clone())
                .await?;

        // 요소 ID가 달라졌으면 기존 테이블의 element_id가 엉뚱한 요소를 가리킴
        let manifest_path = self.workspace.manifest_path(version);
        let previous = if manifest_path.exists() {
            Some(Manifest::load(&manifest_path)?.fingerprint)
        } else {
            None
        };
        if previous.as_deref() != Some(fingerprint.as_str()) && index.reset().await? {
            tracing::warn!(
                "Elements of version {} changed since the last ingest, rebuilding vectors",
                version
            );
        }
        let vectors = index.bootstrap(&store).await?;

        let manifest = Manifest {
            version: version.to_string(),
            source: source.to_string(),
            element_count: store.len(),
            page_count: pages.len(),
            table_count,
            vector_count: vectors.vector_count(),
            fingerprint,
            ingested_at: Utc::now(),
        };
        manifest.save(&manifest_path)?;
        self.workspace.set_active_version(version)?;

        tracing::info!(
            "Version {} ready: {} elements, {} pages, {} vectors",
            version,
            manifest.element_count,
            manifest.page_count,
            manifest.vector_count
        );

        Ok(IngestReport {
            manifest,
            summaries,
            vectors,
            skipped,
        })
    }
}

// ============================================================================
// Corpus
// ============================================================================

/// 질의 시점에 로드되는 수집 결과
pub struct Corpus {
    pub version: String,
    pub elements: Arc<ElementStore>,
    pub pages: Arc<PageStore>,
    pub manifest: Manifest,
    vectors_path: PathBuf,
}

impl Corpus {
    /// 버전 로드 (None이면 활성 버전)
    pub fn load(workspace: &Workspace, version: Option<&str>) -> Result<Self> {
        let version = match version {
            Some(v) => v.to_string(),
            None => workspace.active_version()?.ok_or_else(|| {
                RagError::IndexUnavailable("no document has been ingested yet".into())
            })?,
        };

        let manifest_path = workspace.manifest_path(&version);
        if !manifest_path.exists() {
            return Err(RagError::IndexUnavailable(format!(
                "version {} is not ingested",
                version
            )));
        }

        Ok(Self {
            manifest: Manifest::load(&manifest_path)?,
            elements: Arc::new(ElementStore::load(&workspace.elements_path(&version))?),
            pages: Arc::new(PageStore::load(&workspace.pages_path(&version))?),
            vectors_path: workspace.vectors_path(&version),
            version,
        })
    }

    /// 키워드 + LanceDB 하이브리드 검색기
    pub async fn retriever(
        &self,
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<HybridRetriever> {
        let lexical = Arc::new(LexicalIndex::build(self.elements.iter())?);
        let vector = Arc::new(LanceVectorIndex::open(&self.vectors_path, embedder).await?);
        if !vector.exists().await? {
            tracing::warn!("Vector index for version {} is missing", self.version);
        }

        Ok(
            HybridRetriever::new(lexical, vector, self.elements.clone(), config.fusion_weights)
                .with_lexical_fallback(config.degrade_to_lexical),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
