//! CLI 모듈
//!
//! trove-rag CLI 명령어 정의 및 구현
//! 모든 설정은 플래그 또는 `TROVE_*` 환경 변수로 받습니다.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::chat::{self, ChatSession, OllamaChat, PromptTemplates, DEFAULT_CHAT_MODEL};
use crate::collector::{CollectionStats, FileCollector, FilePattern, DEFAULT_FILE_PATTERN};
use crate::embedding::{
    OllamaEmbedding, DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL, DEFAULT_OLLAMA_URL,
};
use crate::engine::{LoadReport, ModelPrompts, RetrievalEngine};
use crate::knowledge::{
    ContentFilter, DocumentLoader, LanceVectorStore, MetadataFilter, QueryResult,
    DEFAULT_COLLECTION,
};

/// mxbai-embed-large 질의 prefix
pub const DEFAULT_QUERY_PREFIX: &str = "Represent this sentence for searching relevant passages: ";

/// 데이터 디렉토리 경로
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".trove-rag")
}

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "trove-rag")]
#[command(version, about = "로컬 폴더 동기화 RAG 채팅", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Commands,
}

/// 공통 설정
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// 문서 폴더 (감시 루트)
    #[arg(long, env = "TROVE_DOCUMENT_PATH", global = true)]
    pub document_path: Option<PathBuf>,

    /// 파일 이름 glob 패턴
    #[arg(long, env = "TROVE_FILE_PATTERN", default_value = DEFAULT_FILE_PATTERN, global = true)]
    pub file_pattern: String,

    /// LanceDB 경로 (기본: 데이터 디렉토리/fragments.lance)
    #[arg(long, env = "TROVE_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// 임베딩 서버 주소
    #[arg(long, env = "TROVE_EMBEDDING_URL", default_value = DEFAULT_OLLAMA_URL, global = true)]
    pub embedding_url: String,

    /// 임베딩 모델
    #[arg(long, env = "TROVE_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL, global = true)]
    pub embedding_model: String,

    /// 임베딩 차원
    #[arg(long, env = "TROVE_EMBEDDING_DIMENSION", default_value_t = DEFAULT_DIMENSION, global = true)]
    pub embedding_dimension: usize,

    /// 문서 임베딩 prefix
    #[arg(long, env = "TROVE_EMBEDDING_PREFIX", default_value = "", global = true)]
    pub embedding_prefix: String,

    /// 질의 임베딩 prefix
    #[arg(long, env = "TROVE_QUERY_PREFIX", default_value = DEFAULT_QUERY_PREFIX, global = true)]
    pub query_prefix: String,

    /// 대화 서버 주소
    #[arg(long, env = "TROVE_CONVERSATION_URL", default_value = DEFAULT_OLLAMA_URL, global = true)]
    pub conversation_url: String,

    /// 대화 모델
    #[arg(long, env = "TROVE_CONVERSATION_MODEL", default_value = DEFAULT_CHAT_MODEL, global = true)]
    pub conversation_model: String,

    /// 대화 요청 고정 헤더 (`k=v,k=v`)
    #[arg(long, env = "TROVE_CONVERSATION_HEADERS", global = true)]
    pub conversation_headers: Option<String>,

    /// 시스템 프롬프트 템플릿 파일
    #[arg(long, env = "TROVE_SYSTEM_PROMPT_PATH", default_value = "./prompts/system.tpl", global = true)]
    pub system_prompt_path: PathBuf,

    /// 컨텍스트 프롬프트 템플릿 파일
    #[arg(long, env = "TROVE_CONTEXT_PROMPT_PATH", default_value = "./prompts/context.tpl", global = true)]
    pub context_prompt_path: PathBuf,

    /// 검색 결과 수
    #[arg(long, env = "TROVE_MAX_RESULTS", default_value_t = 5, global = true)]
    pub max_results: usize,

    /// 채팅에서 렌더링된 컨텍스트 프롬프트 표시
    #[arg(long, env = "TROVE_SHOW_PROMPT", global = true)]
    pub show_prompt: bool,
}

impl Settings {
    /// 문서 폴더 (필수)
    fn document_root(&self) -> Result<&Path> {
        self.document_path.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "문서 폴더가 설정되지 않았습니다.\n\n\
                 설정 방법:\n  \
                 export TROVE_DOCUMENT_PATH=/path/to/notes\n  \
                 또는\n  \
                 --document-path /path/to/notes"
            )
        })
    }

    /// LanceDB 경로
    pub fn database_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("fragments.lance"))
    }

    fn prompts(&self) -> ModelPrompts {
        ModelPrompts::new(self.embedding_prefix.clone(), self.query_prefix.clone())
    }

    async fn open_store(&self) -> Result<LanceVectorStore> {
        let embedder = OllamaEmbedding::new(
            &self.embedding_url,
            self.embedding_model.clone(),
            self.embedding_dimension,
        )
        .context("임베딩 프로바이더 생성 실패")?;

        LanceVectorStore::open(&self.database_path(), DEFAULT_COLLECTION, Arc::new(embedder))
            .await
            .context("LanceDB 열기 실패")
    }

    async fn open_engine(&self) -> Result<RetrievalEngine> {
        let store = self.open_store().await?;
        Ok(RetrievalEngine::new(
            Arc::new(store),
            self.prompts(),
            DocumentLoader::with_defaults(),
        ))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 폴더를 한 번 동기화
    Index,

    /// 동기화 후 Ctrl-C까지 변경 감시
    Watch,

    /// 인덱스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한 (기본: --max-results)
        #[arg(short, long)]
        limit: Option<usize>,

        /// 메타데이터 필터 (`key=value`, 반복 가능)
        #[arg(short, long = "where", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// 본문에 포함되어야 할 문자열
        #[arg(long, conflicts_with = "not_contains")]
        contains: Option<String>,

        /// 본문에 포함되지 않아야 할 문자열
        #[arg(long)]
        not_contains: Option<String>,
    },

    /// 실시간 동기화되는 대화
    Chat,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings;
    match cli.command {
        Commands::Index => cmd_index(&settings).await,
        Commands::Watch => cmd_watch(&settings).await,
        Commands::Query {
            query,
            limit,
            filters,
            contains,
            not_contains,
        } => {
            let content_filter = contains
                .map(ContentFilter::Contains)
                .or(not_contains.map(ContentFilter::NotContains));
            cmd_query(
                &settings,
                &query,
                limit.unwrap_or(settings.max_results),
                &filters,
                content_filter,
            )
            .await
        }
        Commands::Chat => cmd_chat(&settings).await,
        Commands::Status => cmd_status(&settings).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 한 번 동기화 (index)
async fn cmd_index(settings: &Settings) -> Result<()> {
    let root = settings.document_root()?;
    let engine = settings.open_engine().await?;

    println!("[*] 동기화 중: {}", root.display());
    let report = engine
        .sync_once(root, &settings.file_pattern)
        .await
        .context("동기화 실패")?;
    print_load_report(&report);

    engine.shutdown().await;
    Ok(())
}

/// 실시간 동기화 (watch)
async fn cmd_watch(settings: &Settings) -> Result<()> {
    let root = settings.document_root()?;
    let engine = settings.open_engine().await?;

    println!("[*] 동기화 중: {}", root.display());
    let report = engine
        .load_all(root, &settings.file_pattern)
        .await
        .context("초기 로드 실패")?;
    print_load_report(&report);

    println!("[*] 변경 감시 중... (Ctrl-C로 종료)");
    tokio::signal::ctrl_c()
        .await
        .context("Ctrl-C 핸들러 등록 실패")?;

    println!("\n[*] 종료 중...");
    engine.shutdown().await;
    Ok(())
}

/// 검색 (query)
async fn cmd_query(
    settings: &Settings,
    query: &str,
    limit: usize,
    filters: &[String],
    content_filter: Option<ContentFilter>,
) -> Result<()> {
    let metadata_filter = parse_filters(filters)?;
    let engine = settings.open_engine().await?;

    println!("[*] 검색 중: \"{}\"", query);

    let results = engine
        .query(
            query,
            limit,
            (!metadata_filter.is_empty()).then_some(&metadata_filter),
            content_filter.as_ref(),
        )
        .await
        .context("검색 실패")?;

    engine.shutdown().await;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }

    Ok(())
}

/// 대화 (chat)
async fn cmd_chat(settings: &Settings) -> Result<()> {
    let root = settings.document_root()?;
    let engine = settings.open_engine().await?;

    println!("[*] 문서 로드 중, 처음에는 시간이 걸릴 수 있습니다...");
    let report = engine
        .load_all(root, &settings.file_pattern)
        .await
        .context("초기 로드 실패")?;
    print_load_report(&report);

    let headers = match settings.conversation_headers.as_deref() {
        Some(raw) => parse_headers(raw)?,
        None => vec![],
    };
    let model = OllamaChat::new(
        &settings.conversation_url,
        settings.conversation_model.clone(),
        &headers,
    )
    .context("대화 모델 생성 실패")?;

    let templates = PromptTemplates::load(
        Some(&settings.system_prompt_path),
        Some(&settings.context_prompt_path),
    )?;
    let session = ChatSession::new(templates);

    println!(
        "[OK] {} 준비됨. 질문을 입력하세요 (/reset: 새 대화, Ctrl-D: 종료)\n",
        settings.conversation_model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line.context("입력 읽기 실패")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/reset" {
            session.reset();
            println!("[*] 새 대화를 시작합니다.\n");
            continue;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (result, ()) = tokio::join!(
            chat::ask(&engine, &session, &model, question, settings.max_results, tx),
            print_chunks(rx)
        );
        println!("\n");

        match result {
            Ok(answer) => {
                if settings.show_prompt {
                    if let Some(prompt) = answer.context_prompt {
                        println!("[prompt]\n{}\n", prompt);
                    }
                }
            }
            Err(e) => println!("[!] 응답 실패: {:#}\n", e),
        }
    }

    println!("\n[*] 종료 중...");
    engine.shutdown().await;
    Ok(())
}

/// 상태 (status)
async fn cmd_status(settings: &Settings) -> Result<()> {
    println!("trove-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 인덱스: {}", settings.database_path().display());
    println!(
        "[*] 임베딩: {} @ {}",
        settings.embedding_model, settings.embedding_url
    );

    // 문서 폴더
    match settings.document_path.as_deref() {
        Some(root) => {
            let collected = FilePattern::new(&settings.file_pattern)
                .map_err(anyhow::Error::from)
                .and_then(|pattern| {
                    FileCollector::new(pattern)
                        .collect_directory(root)
                        .map_err(anyhow::Error::from)
                });
            match collected {
                Ok(files) => {
                    let stats = CollectionStats::from_files(&files);
                    println!(
                        "[OK] 문서 폴더: {} ({} 파일, {})",
                        root.display(),
                        stats.total_files,
                        format_bytes(stats.total_size as usize)
                    );
                }
                Err(e) => println!("[!] 문서 폴더 읽기 실패: {:#}", e),
            }
        }
        None => {
            println!("[!] 문서 폴더: 미설정");
            println!("    설정: export TROVE_DOCUMENT_PATH=/path/to/notes");
        }
    }

    // 인덱스 상태
    match settings.open_store().await {
        Ok(store) => match crate::knowledge::VectorStore::count(&store).await {
            Ok(count) => println!("[OK] 인덱스: {} 프래그먼트", count),
            Err(e) => println!("[!] 인덱스 조회 실패: {:#}", e),
        },
        Err(e) => println!("[!] 인덱스 열기 실패: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_load_report(report: &LoadReport) {
    println!(
        "[OK] {} 파일: 추가 {}, 삭제 {}, 유지 {}, 건너뜀 {}",
        report.discovered,
        report.reconcile.added,
        report.reconcile.removed + report.pruned,
        report.reconcile.unchanged,
        report.reconcile.skipped
    );
}

fn print_result(rank: usize, result: &QueryResult) {
    println!("{}. [점수: {:.4}] {}", rank, result.similarity, result.id);
    println!("   내용: {}", truncate_text(&result.content, 200));
    println!();
}

async fn print_chunks(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = std::io::stdout();
    while let Some(chunk) = rx.recv().await {
        print!("{}", chunk);
        stdout.flush().ok();
    }
}

/// `key=value` 목록을 메타데이터 필터로
fn parse_filters(items: &[String]) -> Result<MetadataFilter> {
    let mut filter = MetadataFilter::new();
    for item in items {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("잘못된 필터 형식: {} (key=value)", item))?;
        filter.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(filter)
}

/// `k=v,k=v` 헤더 목록 파싱
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => Ok((k.trim().to_string(), v.trim().to_string())),
            None => bail!("잘못된 헤더 형식: {}", pair),
        })
        .collect()
}

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
