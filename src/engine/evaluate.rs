//! 배치 평가 - 질문 CSV를 순서대로 답변하고 채점
//!
//! 행 하나의 실패는 배치를 멈추지 않습니다. 답변 실패 행은
//! `Error processing query.`와 점수 0으로 기록됩니다.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::AdaptiveController;
use crate::error::{RagError, Result};
use crate::llm::Generator;
use crate::prompts;

/// 답변 실패 행에 기록되는 문구
pub const ERROR_ANSWER: &str = "Error processing query.";

const QUESTION_HEADERS: [&str; 2] = ["question", "frage"];
const REFERENCE_HEADERS: [&str; 2] = ["reference_answer", "antwort"];

// ============================================================================
// Judge
// ============================================================================

/// 생성 답변 채점기 (0 또는 1)
#[async_trait]
pub trait Judge: Send + Sync {
    async fn score(&self, query: &str, reference_answer: &str, generated_answer: &str) -> Result<u8>;
}

/// LLM 채점기
pub struct LlmJudge {
    generator: Arc<dyn Generator>,
}

impl LlmJudge {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn score(&self, query: &str, reference_answer: &str, generated_answer: &str) -> Result<u8> {
        let prompt = prompts::evaluation_prompt(query, reference_answer, generated_answer);
        let raw = self.generator.generate(&prompt).await?;
        parse_score(&raw)
    }
}

/// 채점 응답 파싱 (앞뒤 공백 제거 후 0 또는 1)
pub fn parse_score(raw: &str) -> Result<u8> {
    match raw.trim() {
        "0" => Ok(0),
        "1" => Ok(1),
        other => Err(RagError::EvaluationScoring(format!(
            "expected 0 or 1, got {:?}",
            other
        ))),
    }
}

// ============================================================================
// CSV
// ============================================================================

/// 질문 한 행 (원본 열 보존)
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRow {
    pub question: String,
    pub reference_answer: String,
    pub fields: Vec<String>,
}

/// 질문 CSV
#[derive(Debug, Clone)]
pub struct QuestionSheet {
    pub headers: Vec<String>,
    pub rows: Vec<QuestionRow>,
}

fn find_column(headers: &[String], names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

/// 질문 CSV 읽기
///
/// 헤더 앞뒤 공백은 무시합니다. `Frage`/`Antwort` 헤더도 받습니다.
pub fn read_questions(path: &Path) -> Result<QuestionSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let question_col = find_column(&headers, &QUESTION_HEADERS).ok_or_else(|| {
        RagError::Config(format!("{}: missing question column", path.display()))
    })?;
    let reference_col = find_column(&headers, &REFERENCE_HEADERS).ok_or_else(|| {
        RagError::Config(format!("{}: missing reference_answer column", path.display()))
    })?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        rows.push(QuestionRow {
            question: field(question_col),
            reference_answer: field(reference_col),
            fields: record.iter().map(str::to_string).collect(),
        });
    }

    Ok(QuestionSheet { headers, rows })
}

/// 결과 CSV 쓰기 (원본 열 + generated_answer, score)
pub fn write_results(path: &Path, headers: &[String], rows: &[EvaluationRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;

    let mut header_row = headers.to_vec();
    header_row.push("generated_answer".into());
    header_row.push("score".into());
    writer.write_record(&header_row)?;

    for row in rows {
        let mut fields = row.input.fields.clone();
        fields.resize(headers.len(), String::new());
        fields.push(row.generated_answer.clone());
        fields.push(row.score.to_string());
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    Ok(())
}

// ============================================================================
// Evaluator
// ============================================================================

/// 평가된 한 행
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRow {
    pub input: QuestionRow,
    pub generated_answer: String,
    pub score: u8,
}

/// 배치 평가 요약
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluationSummary {
    pub total: usize,
    pub correct: usize,
    /// 답변 생성에 실패한 행 수
    pub failed: usize,
    /// 채점 응답을 해석하지 못한 행 수
    pub unscored: usize,
}

impl EvaluationSummary {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// 배치 평가기
pub struct Evaluator<'a> {
    controller: &'a AdaptiveController,
    judge: &'a dyn Judge,
}

impl<'a> Evaluator<'a> {
    pub fn new(controller: &'a AdaptiveController, judge: &'a dyn Judge) -> Self {
        Self { controller, judge }
    }

    /// 행들을 순서대로 평가
    pub async fn evaluate_rows(&self, rows: &[QuestionRow]) -> (Vec<EvaluationRow>, EvaluationSummary) {
        let mut results = Vec::with_capacity(rows.len());
        let mut summary = EvaluationSummary {
            total: rows.len(),
            ..Default::default()
        };

        for (i, row) in rows.iter().enumerate() {
            tracing::info!("[{}/{}] {}", i + 1, rows.len(), row.question);

            let (generated_answer, score) = match self.controller.answer(&row.question).await {
                Ok(answer) => {
                    let score = match self
                        .judge
                        .score(&row.question, &row.reference_answer, &answer.text)
                        .await
                    {
                        Ok(score) => score,
                        Err(e) => {
                            tracing::warn!("Row {} could not be scored: {}", i + 1, e);
                            summary.unscored += 1;
                            0
                        }
                    };
                    (answer.text, score)
                }
                Err(e) => {
                    tracing::error!("Row {} failed: {}", i + 1, e);
                    summary.failed += 1;
                    (ERROR_ANSWER.to_string(), 0)
                }
            };

            if score == 1 {
                summary.correct += 1;
            }
            results.push(EvaluationRow {
                input: row.clone(),
                generated_answer,
                score,
            });
        }

        (results, summary)
    }

    /// CSV 파일 평가
    pub async fn evaluate_file(&self, input: &Path, output: &Path) -> Result<EvaluationSummary> {
        let sheet = read_questions(input)?;
        tracing::info!("Evaluating {} questions from {:?}", sheet.rows.len(), input);

        let (rows, summary) = self.evaluate_rows(&sheet.rows).await;
        write_results(output, &sheet.headers, &rows)?;

        tracing::info!(
            "Accuracy {:.1}% ({}/{}), {} failed, {} unscored",
            summary.accuracy() * 100.0,
            summary.correct,
            summary.total,
            summary.failed,
            summary.unscored
        );
        Ok(summary)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FusionWeights, RagConfig};
    use crate::document::{ElementStore, ElementType, PageStore};
    use crate::embedding::testing::KeywordEmbedding;
    use crate::engine::GenerationPolicy;
    use crate::knowledge::{HybridRetriever, LexicalIndex, MemoryVectorIndex};
    use crate::llm::testing::FnGenerator;
    use tempfile::TempDir;

    async fn controller(generator: Arc<FnGenerator>) -> AdaptiveController {
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
        AdaptiveController::new(
            HybridRetriever::new(lexical, vector, elements, FusionWeights::default()),
            pages,
            generator,
            GenerationPolicy::from(&RagConfig::default()),
        )
    }

    fn write_csv(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score(" 1\n").unwrap(), 1);
        assert_eq!(parse_score("0").unwrap(), 0);
        assert!(matches!(parse_score("yes"), Err(RagError::EvaluationScoring(_))));
        assert!(parse_score("10").is_err());
    }

    #[test]
    fn test_read_questions_trims_headers_and_accepts_aliases() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "q.csv", " Frage , Antwort ,id\nWas?,Das.,7\n");

        let sheet = read_questions(&path).unwrap();
        assert_eq!(sheet.headers, vec!["Frage", "Antwort", "id"]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].question, "Was?");
        assert_eq!(sheet.rows[0].reference_answer, "Das.");
    }

    #[test]
    fn test_read_questions_missing_column() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "q.csv", "prompt,answer\na,b\n");
        assert!(matches!(read_questions(&path), Err(RagError::Config(_))));
    }

    #[tokio::test]
    async fn test_failed_row_does_not_stop_batch() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(
            &dir,
            "in.csv",
            "question,reference_answer\n\
             How to install the filter?,Install it [page_num:1]\n\
             What is the torque?,20 Nm\n\
             Filter again?,Install it\n",
        );
        let output = dir.path().join("out.csv");

        let generator = Arc::new(FnGenerator::new(|prompt| {
            if prompt.contains("Question: What is the torque?") {
                Err(RagError::Generation("HTTP 500".into()))
            } else {
                Ok("Install the filter [page_num:1]".into())
            }
        }));
        let judge_llm = Arc::new(FnGenerator::new(|_| Ok("1".into())));
        let judge = LlmJudge::new(judge_llm.clone());
        let controller = controller(generator).await;

        let summary = Evaluator::new(&controller, &judge)
            .evaluate_file(&input, &output)
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.correct, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.accuracy() - 2.0 / 3.0).abs() < 1e-9);
        // 실패 행은 채점하지 않음
        assert_eq!(judge_llm.calls(), 2);

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(
            headers,
            vec!["question", "reference_answer", "generated_answer", "score"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][2], ERROR_ANSWER);
        assert_eq!(&rows[1][3], "0");
        assert_eq!(&rows[0][3], "1");
        assert_eq!(&rows[2][3], "1");
    }

    #[tokio::test]
    async fn test_unparseable_judgement_scores_zero() {
        let generator = Arc::new(FnGenerator::new(|_| Ok("Install the filter [page_num:1]".into())));
        let judge = LlmJudge::new(Arc::new(FnGenerator::new(|_| Ok("maybe".into()))));
        let controller = controller(generator).await;

        let rows = vec![QuestionRow {
            question: "filter?".into(),
            reference_answer: "Install it".into(),
            fields: vec!["filter?".into(), "Install it".into()],
        }];
        let (results, summary) = Evaluator::new(&controller, &judge).evaluate_rows(&rows).await;

        assert_eq!(results[0].score, 0);
        assert_eq!(results[0].generated_answer, "Install the filter [page_num:1]");
        assert_eq!(summary.unscored, 1);
        assert_eq!(summary.correct, 0);
    }
}
