//! 표 요약 - 표 요소를 자연어 요약으로 교체
//!
//! 요약은 `table_summaries.json`에 표 원문의 SHA-256을 키로 캐시합니다.
//! 캐시에 있는 표는 다시 요약하지 않습니다.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::{ElementId, ElementStore};
use crate::error::Result;
use crate::llm::Generator;
use crate::prompts;

/// 캐시 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub key: String,
    pub element_id: ElementId,
    pub summary: String,
}

/// 캐시 파일 형식
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CacheFile {
    Keyed(Vec<SummaryEntry>),
    /// 표 순서대로 나열된 요약 문자열
    Legacy(Vec<String>),
}

/// 표 원문의 캐시 키
pub fn table_key(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// SummaryCache
// ============================================================================

/// 표 요약 캐시
#[derive(Debug, Default)]
pub struct SummaryCache {
    entries: Vec<SummaryEntry>,
    by_key: HashMap<String, usize>,
}

impl SummaryCache {
    /// 캐시 파일 로드 (없으면 빈 캐시)
    ///
    /// 예전 형식(문자열 배열)은 `tables` 순서에 맞춰 키를 붙입니다.
    pub fn load<'a, I>(path: &Path, tables: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ElementId, &'a str)>,
    {
        let mut cache = Self::default();
        if !path.exists() {
            return Ok(cache);
        }

        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<CacheFile>(&raw)? {
            CacheFile::Keyed(entries) => {
                for entry in entries {
                    cache.insert(entry);
                }
            }
            CacheFile::Legacy(summaries) => {
                tracing::warn!(
                    "{:?} uses the positional summary format, aligning {} summaries by table order",
                    path,
                    summaries.len()
                );
                for ((element_id, text), summary) in tables.into_iter().zip(summaries) {
                    cache.insert(SummaryEntry {
                        key: table_key(text),
                        element_id,
                        summary,
                    });
                }
            }
        }

        tracing::debug!("Loaded {} cached table summaries", cache.len());
        Ok(cache)
    }

    pub fn get(&self, key: &str) -> Option<&SummaryEntry> {
        self.by_key.get(key).map(|&i| &self.entries[i])
    }

    /// 항목 추가 (같은 키가 있으면 교체)
    pub fn insert(&mut self, entry: SummaryEntry) {
        match self.by_key.get(&entry.key) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.by_key.insert(entry.key.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

// ============================================================================
// TableSummarizer
// ============================================================================

/// 요약 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub cached: usize,
    pub generated: usize,
}

/// 표 요약기
pub struct TableSummarizer {
    generator: Arc<dyn Generator>,
}

impl TableSummarizer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// 저장소의 모든 표를 요약으로 교체
    ///
    /// 새 요약이 생긴 경우에만 캐시 파일을 다시 씁니다.
    /// 생성 실패 시 그때까지의 요약을 저장한 뒤 에러를 반환합니다.
    pub async fn summarize(&self, store: &mut ElementStore, cache_path: &Path) -> Result<SummaryStats> {
        let tables: Vec<(ElementId, String)> = store
            .tables()
            .map(|e| (e.id, e.content.clone()))
            .collect();
        if tables.is_empty() {
            return Ok(SummaryStats::default());
        }

        let mut cache =
            SummaryCache::load(cache_path, tables.iter().map(|(id, t)| (*id, t.as_str())))?;
        let mut stats = SummaryStats::default();
        tracing::info!("Summarizing {} tables ({} cached)", tables.len(), cache.len());

        for (element_id, text) in &tables {
            let key = table_key(text);
            let summary = match cache.get(&key) {
                Some(entry) => {
                    stats.cached += 1;
                    entry.summary.clone()
                }
                None => {
                    let prompt = prompts::table_summary_prompt(text);
                    let summary = match self.generator.generate(&prompt).await {
                        Ok(summary) => summary,
                        Err(e) => {
                            if stats.generated > 0 {
                                cache.save(cache_path)?;
                            }
                            return Err(e);
                        }
                    };
                    tracing::debug!("Summarized table element {}", element_id);
                    stats.generated += 1;
                    cache.insert(SummaryEntry {
                        key,
                        element_id: *element_id,
                        summary: summary.clone(),
                    });
                    summary
                }
            };
            store.replace_content(*element_id, summary);
        }

        if stats.generated > 0 {
            cache.save(cache_path)?;
        }
        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================
