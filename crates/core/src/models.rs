use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingConfig;

/// Name of the single collection every chunk record lives in.
pub const DEFAULT_COLLECTION: &str = "documents";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub index: u64,
}

impl Chunk {
    pub fn new(source: &str, index: u64, text: impl Into<String>) -> Self {
        Self {
            id: chunk_id(source, index),
            text: text.into(),
            source: source.to_string(),
            index,
        }
    }
}

/// Composite key used by every store: `<docName>_chunk_<index>`.
pub fn chunk_id(source: &str, index: u64) -> String {
    format!("{source}_chunk_{index}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub document: String,
    pub source_path: String,
    pub checksum: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FolderIngestion {
    pub ingested: Vec<IngestionReport>,
    pub skipped: Vec<SkippedDocument>,
}

#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub chunking: ChunkingConfig,
    /// Chunks forwarded to the model as context.
    pub context_top_k: usize,
    /// Chunks shown by a search preview.
    pub search_top_k: usize,
    pub stream: bool,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            context_top_k: 3,
            search_top_k: 5,
            stream: true,
        }
    }
}
