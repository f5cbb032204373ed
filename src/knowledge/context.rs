//! 컨텍스트 조립 - 검색된 요소를 페이지 전문으로 복원
//!
//! 요소가 속한 페이지를 찾아 `Page {n}: {내용}` 블록으로 만들고 빈 줄로 연결합니다.
//! 페이지는 처음 검색된 순서를 유지하며 한 번만 등장합니다.

use std::collections::HashSet;
use std::fmt;

use super::hybrid::RetrievalResult;
use crate::document::{Element, PageStore};

/// 페이지 저장소에 없는 페이지의 자리표시자
pub const UNKNOWN_CONTENT: &str = "Unknown Content";

const BLOCK_SEPARATOR: &str = "\n\n";

/// 한 페이지 분량의 컨텍스트
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock<'a> {
    pub page_number: u32,
    /// None이면 페이지가 저장소에 없음
    pub content: Option<&'a str>,
}

impl fmt::Display for ContextBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page {}: {}",
            self.page_number,
            self.content.unwrap_or(UNKNOWN_CONTENT)
        )
    }
}

/// 요소 순서대로 페이지 블록 생성 (페이지 중복 제거)
pub fn context_blocks<'a, 'e, I>(elements: I, pages: &'a PageStore) -> Vec<ContextBlock<'a>>
where
    I: IntoIterator<Item = &'e Element>,
{
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();

    for element in elements {
        if !seen.insert(element.page_number) {
            continue;
        }
        let content = pages.get(element.page_number);
        if content.is_none() {
            tracing::warn!(
                "Page {} of element {} missing from page store",
                element.page_number,
                element.id
            );
        }
        blocks.push(ContextBlock {
            page_number: element.page_number,
            content,
        });
    }

    blocks
}

/// 검색 결과로 컨텍스트 문자열 조립
pub fn assemble(results: &[RetrievalResult], pages: &PageStore) -> String {
    render(&context_blocks(results.iter().map(|r| &r.element), pages))
}

/// 블록들을 빈 줄로 연결
pub fn render(blocks: &[ContextBlock<'_>]) -> String {
    blocks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ElementType, Page};
    use crate::knowledge::RetrievalSource;

    fn element(id: i64, page: u32) -> Element {
        Element {
            id,
            page_number: page,
            element_type: ElementType::Text,
            content: format!("element {}", id),
        }
    }

    fn result(id: i64, page: u32) -> RetrievalResult {
        RetrievalResult {
            element: element(id, page),
            rank_score: 0.0,
            source: RetrievalSource::Lexical,
        }
    }

    fn pages() -> PageStore {
        PageStore::from_pages(vec![
            Page {
                page_number: 1,
                content: "Install the filter.".to_string(),
            },
            Page {
                page_number: 2,
                content: "Torque spec: 20 Nm.".to_string(),
            },
        ])
    }

    #[test]
    fn test_known_page_renders_stored_content() {
        let context = assemble(&[result(7, 2)], &pages());
        assert_eq!(context, "Page 2: Torque spec: 20 Nm.");
    }

    #[test]
    fn test_missing_page_renders_placeholder() {
        let context = assemble(&[result(1, 2), result(9, 5)], &pages());
        assert_eq!(context, "Page 2: Torque spec: 20 Nm.\n\nPage 5: Unknown Content");
    }

    #[test]
    fn test_retrieval_order_and_dedup() {
        let results = vec![result(3, 2), result(0, 1), result(4, 2)];
        let store = pages();
        let blocks = context_blocks(results.iter().map(|r| &r.element), &store);
        let order: Vec<u32> = blocks.iter().map(|b| b.page_number).collect();
        assert_eq!(order, vec![2, 1]);
        assert_eq!(
            render(&blocks),
            "Page 2: Torque spec: 20 Nm.\n\nPage 1: Install the filter."
        );
    }

    #[test]
    fn test_empty_results_empty_context() {
        assert!(assemble(&[], &pages()).is_empty());
    }
}
