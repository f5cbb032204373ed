//! 키워드 인덱스 - 인메모리 SQLite FTS5
//!
//! 요소 하나당 한 행을 넣고 FTS5 내장 `bm25()`로 순위를 매깁니다.
//! 쿼리 단어는 따옴표로 감싸 `OR`로 연결하므로 한 단어만 겹쳐도 후보가 됩니다.
//! ref: https://www.sqlite.org/fts5.html#the_bm25_function

use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::ranking::{Ranked, RankedRetriever};
use crate::document::Element;
use crate::error::{RagError, Result};

/// FTS5 키워드 인덱스
pub struct LexicalIndex {
    conn: Mutex<Connection>,
}

impl LexicalIndex {
    /// 요소 목록으로 인덱스 구축 (요소 ID = rowid)
    pub fn build<'a, I>(elements: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Element>,
    {
        let mut conn = Connection::open_in_memory()?;

        conn.execute(
            "CREATE VIRTUAL TABLE elements_fts USING fts5(
                content,
                tokenize = 'unicode61 remove_diacritics 2'
            )",
            [],
        )
        .map_err(|e| RagError::Storage(format!("FTS5 not available: {}", e)))?;

        let mut size = 0;
        {
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO elements_fts(rowid, content) VALUES (?1, ?2)")?;
                for element in elements {
                    stmt.execute(params![element.id, element.content])?;
                    size += 1;
                }
            }
            tx.commit()?;
        }

        tracing::debug!("Lexical index built over {} elements", size);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// BM25 검색 (동점은 요소 ID 오름차순)
    pub fn search(&self, text: &str, top_n: usize) -> Result<Vec<Ranked>> {
        let match_expr = build_match_query(text);
        if match_expr.is_empty() || top_n == 0 {
            return Ok(vec![]);
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| RagError::Storage(format!("Lock error: {}", e)))?;

        let mut stmt = conn.prepare(
            "SELECT rowid, bm25(elements_fts)
             FROM elements_fts
             WHERE elements_fts MATCH ?1
             ORDER BY bm25(elements_fts), rowid
             LIMIT ?2",
        )?;

        let results = stmt
            .query_map(params![match_expr, top_n as i64], |row| {
                let bm25: f64 = row.get(1)?;
                Ok(Ranked {
                    element_id: row.get(0)?,
                    // bm25()는 음수일수록 관련도가 높음
                    score: (-bm25) as f32,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(results)
    }
}

#[async_trait]
impl RankedRetriever for LexicalIndex {
    async fn query(&self, text: &str, top_n: usize) -> Result<Vec<Ranked>> {
        self.search(text, top_n)
    }

    fn name(&self) -> &str {
        "fts5"
    }
}

/// 자유 텍스트를 FTS5 MATCH 식으로 변환
///
/// 영숫자 단어만 남기고 소문자화, 중복 제거 후 `"a" OR "b"` 형태로 만듭니다.
fn build_match_query(text: &str) -> String {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }

    terms
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
