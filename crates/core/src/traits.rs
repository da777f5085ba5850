use crate::{ChunkRecord, GenerationError, RetrievedChunk, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts every record or none of them; an existing id is a conflict.
    async fn add(&self, records: &[ChunkRecord]) -> Result<(), StoreError>;

    /// Up to `k` chunks ordered by descending similarity.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, StoreError>;

    async fn list_by_source(&self) -> Result<BTreeMap<String, usize>, StoreError>;

    /// Returns how many chunks were removed; zero means the source was unknown.
    async fn delete_by_source(&self, source: &str) -> Result<usize, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Receives generated text fragments in arrival order.
pub type FragmentSink<'a> = &'a mut (dyn FnMut(&str) + Send);

#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    async fn health_check(&self) -> Result<(), GenerationError>;

    async fn generate(
        &self,
        prompt: &str,
        stream: bool,
        on_fragment: FragmentSink<'_>,
    ) -> Result<String, GenerationError>;

    async fn list_models(&self) -> Result<Vec<String>, GenerationError>;
}
