//! 문서 분할 - PDF 또는 구조 추출 JSON을 요소 목록으로 변환
//!
//! - PDF: pdf-extract로 페이지별 텍스트를 얻고, 빈 줄 단위 블록을 휴리스틱으로 분류
//! - JSON: 외부 구조 추출 서비스 출력 (`{"elements": [{type, text_representation, properties}]}`)
//!
//! 표는 쉼표 구분 텍스트로 정규화됩니다.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use super::ElementType;
use crate::error::{RagError, Result};

/// 분할된 원시 요소
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub page_number: u32,
    pub element_type: ElementType,
    pub text: String,
}

/// 확장자로 분할 방식을 골라 요소 추출
pub fn partition_bytes(path: &Path, bytes: &[u8]) -> Result<Vec<RawElement>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => partition_pdf(bytes),
        "json" => partition_structured_json(bytes),
        other => Err(RagError::Ingestion(format!(
            "unsupported document type '{}' for {}",
            other,
            path.display()
        ))),
    }
}

// ============================================================================
// PDF
// ============================================================================

/// PDF 바이트에서 요소 추출
pub fn partition_pdf(bytes: &[u8]) -> Result<Vec<RawElement>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Ingestion(format!("PDF text extraction failed: {}", e)))?;

    if text.trim().is_empty() {
        return Err(RagError::Ingestion(
            "no text extracted from PDF (scanned document?)".to_string(),
        ));
    }

    let elements: Vec<RawElement> = split_pages(&text)
        .into_iter()
        .enumerate()
        .flat_map(|(i, page)| partition_page_text((i + 1) as u32, &page))
        .collect();

    tracing::debug!("Partitioned PDF into {} elements", elements.len());
    Ok(elements)
}

/// 폼피드 문자로 페이지 분리 (빈 페이지도 번호 유지)
fn split_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();

    // 마지막 폼피드 뒤의 빈 꼬리 제거
    let mut pages = pages;
    while pages.len() > 1 && pages.last().map(|p| p.is_empty()).unwrap_or(false) {
        pages.pop();
    }
    pages
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("static pattern"))
}

static BLOCK_RE: OnceLock<Regex> = OnceLock::new();
static FOOTER_RE: OnceLock<Regex> = OnceLock::new();
static COLUMN_RE: OnceLock<Regex> = OnceLock::new();

/// 한 페이지 텍스트를 블록 단위 요소로 분할
pub fn partition_page_text(page_number: u32, text: &str) -> Vec<RawElement> {
    pattern(&BLOCK_RE, r"\n\s*\n")
        .split(text)
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(|block| {
            let element_type = classify_block(block);
            let text = if element_type == ElementType::Table {
                table_to_csv(block)
            } else {
                block.to_string()
            };
            RawElement {
                page_number,
                element_type,
                text,
            }
        })
        .collect()
}

/// 블록 분류 휴리스틱
///
/// - 2줄 이상이고 모든 줄이 열 구분(탭, `|`, 2칸 이상 공백)을 가지면 표
/// - 한 줄, 80자 이하, 문장부호로 끝나지 않으면 제목
/// - "Page N" 또는 숫자만 있는 한 줄은 페이지 푸터
fn classify_block(block: &str) -> ElementType {
    let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();

    if lines.len() >= 2 && lines.iter().all(|l| split_columns(l).len() >= 2) {
        return ElementType::Table;
    }

    if lines.len() == 1 {
        let line = lines[0].trim();
        if pattern(&FOOTER_RE, r"^(?i:page\s+)?\d+(\s*(/|of)\s*\d+)?$").is_match(line) {
            return ElementType::PageFooter;
        }
        let ends_with_punct = line.ends_with(['.', ',', ';', ':', '?', '!']);
        if line.chars().count() <= 80 && !ends_with_punct {
            return ElementType::SectionHeader;
        }
    }

    ElementType::Text
}

/// 표 한 줄을 열로 분리
fn split_columns(line: &str) -> Vec<String> {
    pattern(&COLUMN_RE, r"\t|\s*\|\s*|\s{2,}")
        .split(line.trim().trim_matches('|'))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// 표 블록을 CSV 텍스트로 변환
fn table_to_csv(block: &str) -> String {
    block
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            split_columns(line)
                .into_iter()
                .map(|cell| {
                    if cell.contains([',', '"']) {
                        format!("\"{}\"", cell.replace('"', "\"\""))
                    } else {
                        cell
                    }
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Structured JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct PartitionDocument {
    elements: Vec<PartitionElement>,
}

#[derive(Debug, Deserialize)]
struct PartitionElement {
    #[serde(rename = "type")]
    element_type: String,
    #[serde(default)]
    text_representation: Option<String>,
    #[serde(default)]
    properties: PartitionProperties,
}

#[derive(Debug, Default, Deserialize)]
struct PartitionProperties {
    #[serde(default)]
    page_number: Option<u32>,
}

/// 구조 추출 JSON에서 요소 추출
///
/// 텍스트가 없는 요소(이미지 등)는 건너뜁니다.
pub fn partition_structured_json(bytes: &[u8]) -> Result<Vec<RawElement>> {
    let doc: PartitionDocument = serde_json::from_slice(bytes)
        .map_err(|e| RagError::Ingestion(format!("invalid partition JSON: {}", e)))?;

    let mut elements = Vec::with_capacity(doc.elements.len());
    for (i, el) in doc.elements.into_iter().enumerate() {
        let page_number = el.properties.page_number.ok_or_else(|| {
            RagError::Ingestion(format!("partition element {} has no page_number", i))
        })?;
        let element_type: ElementType = el.element_type.parse().unwrap_or(ElementType::Other);
        let text = el.text_representation.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            continue;
        }
        let text = if element_type == ElementType::Table && !text.contains(',') {
            table_to_csv(&text)
        } else {
            text
        };
        elements.push(RawElement {
            page_number,
            element_type,
            text,
        });
    }

    Ok(elements)
}

// ============================================================================
// Tests
// ============================================================================
