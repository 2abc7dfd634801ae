//! trove-rag - 로컬 폴더 동기화 RAG
//!
//! 문서 폴더를 감시하며 Markdown 프래그먼트를 LanceDB 인덱스와
//! 동기화하고, 검색 결과로 보강된 대화를 제공합니다.

pub mod chat;
pub mod cli;
pub mod collector;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod watcher;

// Re-exports
pub use chat::{ask, Answer, ChatMessage, ChatModel, ChatSession, OllamaChat, PromptTemplates, Role};
pub use collector::{CollectedFile, FileCollector, FilePattern};
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use engine::{LoadReport, ModelPrompts, RetrievalEngine};
pub use error::{EngineError, Result};
pub use knowledge::{
    ChunkConfig, Chunker, ContentFilter, DocumentLoader, Fragment, InMemoryVectorStore,
    LanceVectorStore, MarkdownChunker, Metadata, MetadataFilter, QueryResult, ReconcileReport,
    Reconciler, StoredDocument, VectorStore,
};
pub use watcher::{FsEvent, FsEventKind, WatchHandle};
