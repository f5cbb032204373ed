//! CLI 모듈
//!
//! manual-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RagConfig;
use crate::embedding::{self, create_embedder, EmbeddingProvider};
use crate::engine::evaluate::{Evaluator, LlmJudge};
use crate::engine::{AdaptiveController, GenerationPolicy};
use crate::ingest::{Corpus, IngestPipeline, Workspace};
use crate::llm::{self, create_generator, Generator};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "manual-rag")]
#[command(version, about = "기술 문서 하이브리드 RAG 질의응답", long_about = None)]
pub struct Cli {
    /// 설정 파일 (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 데이터 디렉토리 (설정값보다 우선)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서(PDF 또는 구조 추출 JSON)를 수집하고 인덱스 생성
    Ingest {
        /// 수집할 문서 경로
        document: PathBuf,

        /// 문서 버전 이름 (기본: 내용 해시)
        #[arg(long = "version", value_name = "VERSION")]
        doc_version: Option<String>,
    },

    /// 활성 문서에 질문
    Ask {
        /// 질문
        question: String,

        /// 초기 검색 폭
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// 질문 CSV 배치 평가
    Evaluate {
        /// 입력 CSV (question, reference_answer)
        input: PathBuf,

        /// 결과 CSV
        output: PathBuf,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Ingest {
            document,
            doc_version,
        } => cmd_ingest(config, &document, doc_version).await,
        Commands::Ask { question, k } => cmd_ask(config, &question, k).await,
        Commands::Evaluate { input, output } => cmd_evaluate(config, &input, &output).await,
        Commands::Status => cmd_status(&config),
    }
}

/// 설정 로드 후 CLI 옵션 적용
fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<RagConfig> {
    let mut config = RagConfig::load_or_default(path).context("설정 로드 실패")?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

fn require_api_keys() -> Result<()> {
    if !embedding::has_api_key() {
        bail!(
            "임베딩 API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    if !llm::has_api_key() {
        bail!(
            "LLM API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GROQ_API_KEY=your-api-key\n  \
             또는\n  \
             export LLM_API_KEY=your-api-key"
        );
    }
    Ok(())
}

fn services(config: &RagConfig) -> Result<(Arc<dyn Generator>, Arc<dyn EmbeddingProvider>)> {
    require_api_keys()?;
    let generator = create_generator(&config.llm).context("LLM 클라이언트 생성 실패")?;
    let embedder = create_embedder(&config.embedding).context("임베딩 프로바이더 생성 실패")?;
    Ok((generator, embedder))
}

/// 활성 버전으로 컨트롤러 생성
async fn open_controller(
    config: &RagConfig,
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<AdaptiveController> {
    let workspace = Workspace::open(&config.data_dir)?;
    let corpus = Corpus::load(&workspace, None).context("문서 로드 실패 (먼저 ingest를 실행하세요)")?;
    tracing::info!(
        "Loaded version {} ({} elements, {} pages)",
        corpus.version,
        corpus.elements.len(),
        corpus.pages.len()
    );

    let retriever = corpus
        .retriever(config, embedder)
        .await
        .context("검색기 초기화 실패")?;

    Ok(AdaptiveController::new(
        retriever,
        corpus.pages.clone(),
        generator,
        GenerationPolicy::from(config),
    ))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(config: RagConfig, document: &Path, version: Option<String>) -> Result<()> {
    let (generator, embedder) = services(&config)?;
    let workspace = Workspace::open(&config.data_dir)?;

    println!("[*] 문서 수집 중: {}", document.display());

    let pipeline = IngestPipeline::new(workspace.clone(), config, generator, embedder);
    let report = pipeline.ingest(document, version).await.context("문서 수집 실패")?;
    let manifest = &report.manifest;

    println!("[OK] 버전 {} 수집 완료", manifest.version);
    println!(
        "     요소: {} (제외 {}), 페이지: {}, 표: {}",
        manifest.element_count, report.skipped, manifest.page_count, manifest.table_count
    );
    println!(
        "     표 요약: 캐시 {}, 신규 {}",
        report.summaries.cached, report.summaries.generated
    );
    println!("     벡터: {}", manifest.vector_count);
    println!("     위치: {}", workspace.version_dir(&manifest.version).display());

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(config: RagConfig, question: &str, k: Option<usize>) -> Result<()> {
    let (generator, embedder) = services(&config)?;
    let controller = open_controller(&config, generator, embedder).await?;

    println!("[*] 질문: \"{}\"", question);

    let width = k.unwrap_or(config.k_initial);
    let answer = controller
        .answer_with_width(question, width)
        .await
        .context("답변 생성 실패")?;

    println!();
    println!("{}", answer.text);
    println!();
    if answer.cited_pages.is_empty() {
        println!("[!] 인용된 페이지 없음");
    } else {
        let pages: Vec<String> = answer.cited_pages.iter().map(|p| p.to_string()).collect();
        println!("[OK] 인용 페이지: {}", pages.join(", "));
    }
    println!("     검색 폭 k={} (시도 {}회)", answer.width, answer.attempts);

    Ok(())
}

/// 배치 평가 명령어 (evaluate)
async fn cmd_evaluate(config: RagConfig, input: &Path, output: &Path) -> Result<()> {
    let (generator, embedder) = services(&config)?;
    let judge = LlmJudge::new(generator.clone());
    let controller = open_controller(&config, generator, embedder).await?;

    println!("[*] 평가 중: {}", input.display());

    let summary = Evaluator::new(&controller, &judge)
        .evaluate_file(input, output)
        .await
        .context("평가 실패")?;

    println!(
        "[OK] 정확도: {:.1}% ({}/{})",
        summary.accuracy() * 100.0,
        summary.correct,
        summary.total
    );
    if summary.failed > 0 || summary.unscored > 0 {
        println!(
            "[!] 답변 실패 {} 건, 채점 실패 {} 건",
            summary.failed, summary.unscored
        );
    }
    println!("     결과: {}", output.display());

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("manual-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    // API 키 상태
    if embedding::has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨 ({})", config.embedding.model);
    } else {
        println!("[!] 임베딩 API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }
    if llm::has_api_key() {
        println!("[OK] LLM API 키: 설정됨 ({})", config.llm.model);
    } else {
        println!("[!] LLM API 키: 미설정");
        println!("    설정: export GROQ_API_KEY=your-key");
    }

    if !config.data_dir.exists() {
        println!("[!] 수집된 문서가 없습니다.");
        return Ok(());
    }

    let workspace = Workspace::open(&config.data_dir)?;
    let active = workspace.active_version()?;
    let versions = workspace.versions().context("버전 목록 조회 실패")?;

    if versions.is_empty() {
        println!("[!] 수집된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 문서 버전 ({} 개):\n", versions.len());
    for manifest in versions {
        let marker = if active.as_deref() == Some(manifest.version.as_str()) {
            "*"
        } else {
            " "
        };
        let size = std::fs::metadata(workspace.elements_path(&manifest.version))
            .map(|m| format_bytes(m.len() as usize))
            .unwrap_or_else(|_| "-".to_string());

        println!("  {} {}  {}", marker, manifest.version, truncate_text(&manifest.source, 60));
        println!(
            "        {} | 요소 {} ({}) | 페이지 {} | 표 {} | 벡터 {}",
            manifest.ingested_at.format("%Y-%m-%d %H:%M"),
            manifest.element_count,
            size,
            manifest.page_count,
            manifest.table_count,
            manifest.vector_count
        );
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from([
            "manual-rag",
            "--data-dir",
            "/tmp/rag",
            "ingest",
            "manual.pdf",
            "--version",
            "v2",
        ]);
        assert_eq!(cli.data_dir.as_deref(), Some(Path::new("/tmp/rag")));
        match cli.command {
            Commands::Ingest {
                document,
                doc_version,
            } => {
                assert_eq!(document, PathBuf::from("manual.pdf"));
                assert_eq!(doc_version.as_deref(), Some("v2"));
            }
            _ => panic!("expected ingest"),
        }

        let cli = Cli::parse_from(["manual-rag", "ask", "What torque?", "-k", "9"]);
        assert!(matches!(cli.command, Commands::Ask { k: Some(9), .. }));
    }

    #[test]
    fn test_load_config_data_dir_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"k_initial": 9, "data_dir": "/from/file"}"#).unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.k_initial, 9);
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));

        let config = load_config(Some(&path), Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.data_dir, dir.path());
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        assert_eq!(truncate_text(korean, 5), "안녕하세요...");
    }
}
