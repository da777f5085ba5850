pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod stores;
#[cfg(test)]
mod test_support;
pub mod traits;

pub use chunking::{chunk_spans, chunk_text, ChunkSpan, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{AskError, EmbeddingError, GenerationError, IngestError, StoreError};
pub use extractor::{extract_document_text, LopdfExtractor, PageText, PlainTextExtractor, TextExtractor};
pub use generation::{GenerationConfig, GenerationStream, NdjsonDecoder, OllamaClient};
pub use ingest::{digest_file, discover_documents, document_name, prepare_document, PreparedDocument};
pub use models::{
    chunk_id, AssistantOptions, Chunk, ChunkRecord, FolderIngestion, IngestionReport,
    RetrievedChunk, SkippedDocument, DEFAULT_COLLECTION,
};
pub use orchestrator::Assistant;
pub use session::{format_listing, format_search, Command, Session, SessionState, SessionStatus};
pub use stores::{LocalStore, QdrantStore};
pub use traits::{FragmentSink, Generator, VectorStore};
