//! 문서 모델 - 요소(Element)와 페이지(Page) 저장소
//!
//! - Element: 문단, 표, 제목 등 세분화된 콘텐츠 단위 (검색 대상)
//! - Page: 같은 페이지 요소들을 문서 순서대로 이어 붙인 텍스트 (컨텍스트 재구성용)
//!
//! 두 저장소 모두 수집 후에는 읽기 전용입니다.

pub mod partition;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

/// 요소 ID (수집 순서상의 위치)
pub type ElementId = i64;

// ============================================================================
// ElementType
// ============================================================================

/// 요소 타입
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementType {
    Text,
    Table,
    Title,
    SectionHeader,
    ListItem,
    Formula,
    Footnote,
    PageFooter,
    PageHeader,
    Caption,
    Image,
    #[serde(other)]
    Other,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Text => "text",
            ElementType::Table => "table",
            ElementType::Title => "title",
            ElementType::SectionHeader => "section-header",
            ElementType::ListItem => "list-item",
            ElementType::Formula => "formula",
            ElementType::Footnote => "footnote",
            ElementType::PageFooter => "page-footer",
            ElementType::PageHeader => "page-header",
            ElementType::Caption => "caption",
            ElementType::Image => "image",
            ElementType::Other => "other",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = std::convert::Infallible;

    /// 대소문자, `_`/공백 구분자를 허용합니다 ("Section-header", "page_footer" 등)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        Ok(match normalized.as_str() {
            "text" | "paragraph" | "narrativetext" => ElementType::Text,
            "table" => ElementType::Table,
            "title" => ElementType::Title,
            "section-header" | "heading" => ElementType::SectionHeader,
            "list-item" => ElementType::ListItem,
            "formula" => ElementType::Formula,
            "footnote" => ElementType::Footnote,
            "page-footer" => ElementType::PageFooter,
            "page-header" => ElementType::PageHeader,
            "caption" => ElementType::Caption,
            "image" | "picture" => ElementType::Image,
            _ => ElementType::Other,
        })
    }
}

// ============================================================================
// Element / Page
// ============================================================================

/// 세분화된 콘텐츠 단위
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: ElementId,
    /// 1부터 시작
    pub page_number: u32,
    pub element_type: ElementType,
    pub content: String,
}

impl Element {
    pub fn is_table(&self) -> bool {
        self.element_type == ElementType::Table
    }
}

/// 페이지 단위 텍스트
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page_number: u32,
    pub content: String,
}

/// 디스크 저장 레코드 (elements.json / pages.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub page_content: String,
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<ElementType>,
}

fn write_records(path: &Path, records: &[StoredRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<StoredRecord>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        RagError::Storage(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

// ============================================================================
// ElementStore
// ============================================================================

/// 요소 저장소 (문서 순서 유지)
#[derive(Debug, Clone, Default)]
pub struct ElementStore {
    elements: Vec<Element>,
    index: HashMap<ElementId, usize>,
}

impl ElementStore {
    /// 요소 목록으로 생성
    ///
    /// 페이지 번호는 1 이상, ID는 중복될 수 없습니다.
    pub fn new(elements: Vec<Element>) -> Result<Self> {
        let mut index = HashMap::with_capacity(elements.len());
        for (pos, element) in elements.iter().enumerate() {
            if element.page_number == 0 {
                return Err(RagError::Ingestion(format!(
                    "element {} has page number 0",
                    element.id
                )));
            }
            if index.insert(element.id, pos).is_some() {
                return Err(RagError::Ingestion(format!(
                    "duplicate element id {}",
                    element.id
                )));
            }
        }
        Ok(Self { elements, index })
    }

    /// (페이지, 타입, 텍스트) 목록에서 순서대로 ID를 부여해 생성
    pub fn from_parts<I>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, ElementType, String)>,
    {
        let elements = parts
            .into_iter()
            .enumerate()
            .map(|(i, (page_number, element_type, content))| Element {
                id: i as ElementId,
                page_number,
                element_type,
                content,
            })
            .collect();
        Self::new(elements)
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.index.get(&id).map(|&pos| &self.elements[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn as_slice(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// 요소 ID/페이지/타입/콘텐츠의 SHA-256 (벡터 테이블과 대조용)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for e in &self.elements {
            hasher.update(e.id.to_le_bytes());
            hasher.update(e.page_number.to_le_bytes());
            hasher.update(e.element_type.as_str().as_bytes());
            hasher.update((e.content.len() as u64).to_le_bytes());
            hasher.update(e.content.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// 표 요소 (수집 순서)
    pub fn tables(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.is_table())
    }

    /// 요소 콘텐츠 교체 (수집 단계 전용: 표 원문 -> 요약)
    pub(crate) fn replace_content(&mut self, id: ElementId, content: String) -> bool {
        match self.index.get(&id) {
            Some(&pos) => {
                self.elements[pos].content = content;
                true
            }
            None => false,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let records: Vec<StoredRecord> = self
            .elements
            .iter()
            .map(|e| StoredRecord {
                page_content: e.content.clone(),
                page_number: e.page_number,
                element_type: Some(e.element_type.clone()),
            })
            .collect();
        write_records(path, &records)?;
        tracing::debug!("Saved {} elements to {:?}", records.len(), path);
        Ok(())
    }

    /// 저장 파일에서 로드 (ID는 파일 내 순서)
    pub fn load(path: &Path) -> Result<Self> {
        let records = read_records(path)?;
        Self::from_parts(records.into_iter().map(|r| {
            (
                r.page_number,
                r.element_type.unwrap_or(ElementType::Text),
                r.page_content,
            )
        }))
    }
}

// ============================================================================
// PageStore
// ============================================================================

/// 페이지 저장소 (page_number가 유일 키)
#[derive(Debug, Clone, Default)]
pub struct PageStore {
    pages: BTreeMap<u32, String>,
}

impl PageStore {
    /// 요소들을 페이지별로 줄바꿈 연결
    pub fn from_elements<'a, I>(elements: I) -> Self
    where
        I: IntoIterator<Item = &'a Element>,
    {
        let mut pages: BTreeMap<u32, String> = BTreeMap::new();
        for element in elements {
            pages
                .entry(element.page_number)
                .and_modify(|text| {
                    text.push('\n');
                    text.push_str(&element.content);
                })
                .or_insert_with(|| element.content.clone());
        }
        Self { pages }
    }

    pub fn from_pages<I>(pages: I) -> Self
    where
        I: IntoIterator<Item = Page>,
    {
        Self {
            pages: pages
                .into_iter()
                .map(|p| (p.page_number, p.content))
                .collect(),
        }
    }

    pub fn get(&self, page_number: u32) -> Option<&str> {
        self.pages.get(&page_number).map(String::as_str)
    }

    pub fn contains(&self, page_number: u32) -> bool {
        self.pages.contains_key(&page_number)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let records: Vec<StoredRecord> = self
            .pages
            .iter()
            .map(|(&page_number, content)| StoredRecord {
                page_content: content.clone(),
                page_number,
                element_type: None,
            })
            .collect();
        write_records(path, &records)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let records = read_records(path)?;
        Ok(Self::from_pages(records.into_iter().map(|r| Page {
            page_number: r.page_number,
            content: r.page_content,
        })))
    }
}

// ============================================================================
// Tests
// ============================================================================
