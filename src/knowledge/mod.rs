//! Knowledge 모듈 - 프래그먼트 인덱스
//!
//! - Identity: `path|sha256` 콘텐츠 주소 ID
//! - Loader: front matter + Markdown 청킹 → 프래그먼트
//! - Reconciler: 디스크 내용과 저장소 동기화
//! - LanceDB / In-memory: 벡터 저장소 구현

mod chunker;
mod identity;
mod lance;
mod loader;
mod memory;
mod metadata;
mod reconciler;
mod vector;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use chunker::{
    Chunk, ChunkConfig, Chunker, MarkdownChunker,
    default_chunker, markdown_chunker,
};
pub use identity::{fragment_id, path_of, sha256_hex, ID_SEPARATOR};
pub use lance::{LanceVectorStore, DEFAULT_COLLECTION};
pub use loader::{split_front_matter, split_path_components, DocumentLoader, Fragment, DOC_PATH_KEY};
pub use memory::InMemoryVectorStore;
pub use metadata::{render_footer, Metadata, MetadataValue};
pub use reconciler::{ReconcileReport, Reconciler, DOC_ID_KEY};
pub use vector::{
    ContentFilter, MetadataFilter, QueryResult, StoredDocument, VectorStore,
    cosine_similarity, matches_metadata,
};
