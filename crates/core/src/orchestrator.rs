use crate::embeddings::Embedder;
use crate::ingest::{discover_documents, prepare_document};
use crate::prompt::{grounded_prompt, plain_prompt};
use crate::traits::{FragmentSink, Generator, VectorStore};
use crate::{
    AskError, AssistantOptions, ChunkRecord, EmbeddingError, FolderIngestion, GenerationError,
    IngestError, IngestionReport, RetrievedChunk, SkippedDocument, StoreError,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Retrieval-augmented question answering over one vector collection.
///
/// Owns the store, generator and embedder it is built with. Store mutations
/// happen only in `ingest*`, `delete_document` and `clear`; `ask` only reads.
pub struct Assistant<S, G, E>
where
    S: VectorStore,
    G: Generator,
    E: Embedder,
{
    store: S,
    generator: G,
    embedder: E,
    options: AssistantOptions,
}

impl<S, G, E> Assistant<S, G, E>
where
    S: VectorStore,
    G: Generator,
    E: Embedder,
{
    /// Fails on an unusable chunking config, before any I/O happens.
    pub fn new(store: S, generator: G, embedder: E, options: AssistantOptions) -> Result<Self, IngestError> {
        options.chunking.validate()?;
        Ok(Self {
            store,
            generator,
            embedder,
            options,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn options(&self) -> &AssistantOptions {
        &self.options
    }

    pub async fn ingest(&self, path: &Path, name: Option<&str>) -> Result<IngestionReport, IngestError> {
        let prepared = prepare_document(path, name, self.options.chunking)?;
        info!(document = %prepared.name, chunks = prepared.chunks.len(), "chunked document");

        let texts = prepared
            .chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            }
            .into());
        }

        let ingested_at = Utc::now();
        let records = prepared
            .chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkRecord {
                chunk,
                embedding,
                ingested_at,
            })
            .collect::<Vec<_>>();

        self.store.add(&records).await?;
        info!(document = %prepared.name, checksum = %prepared.checksum, chunks = records.len(), "stored document");

        Ok(IngestionReport {
            document: prepared.name,
            source_path: prepared.source_path,
            checksum: prepared.checksum,
            chunk_count: records.len(),
        })
    }

    /// Ingests every supported file under `folder`; failures are reported per file.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderIngestion, IngestError> {
        let files = discover_documents(folder);
        if files.is_empty() {
            return Err(IngestError::NotFound(format!(
                "no documents found in {}",
                folder.display()
            )));
        }

        let mut ingested = Vec::new();
        let mut skipped = Vec::new();
        for path in files {
            match self.ingest(&path, None).await {
                Ok(report) => ingested.push(report),
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped document");
                    skipped.push(SkippedDocument {
                        path: path.display().to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(FolderIngestion { ingested, skipped })
    }

    /// Single files fail as a whole; directories are ingested file by file.
    pub async fn ingest_path(&self, path: &Path) -> Result<FolderIngestion, IngestError> {
        if path.is_dir() {
            return self.ingest_folder(path).await;
        }

        let report = self.ingest(path, None).await?;
        Ok(FolderIngestion {
            ingested: vec![report],
            skipped: Vec::new(),
        })
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, AskError> {
        let vector = self.embedder.embed(query).await?;
        Ok(self.store.query(&vector, k).await?)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedChunk>, AskError> {
        self.retrieve(query, self.options.search_top_k).await
    }

    pub async fn build_prompt(&self, question: &str, use_context: bool) -> Result<String, AskError> {
        if !use_context {
            return Ok(plain_prompt(question));
        }

        let context = self
            .retrieve(question, self.options.context_top_k)
            .await?
            .into_iter()
            .map(|hit| hit.text)
            .collect::<Vec<_>>();
        Ok(grounded_prompt(question, &context))
    }

    pub async fn ask(
        &self,
        question: &str,
        use_context: bool,
        on_fragment: FragmentSink<'_>,
    ) -> Result<String, AskError> {
        let prompt = self.build_prompt(question, use_context).await?;
        let answer = self
            .generator
            .generate(&prompt, self.options.stream, on_fragment)
            .await?;
        Ok(answer)
    }

    /// User-facing text for a failed [`Assistant::ask`]. Presenters print it
    /// even when fragments were already streamed before the failure.
    pub async fn describe_failure(&self, error: &AskError) -> String {
        match error {
            AskError::Generation(GenerationError::ServiceUnavailable { url, .. }) => format!(
                "Error: Cannot connect to Ollama at {url}. Please start it with 'ollama serve'"
            ),
            AskError::Generation(GenerationError::ModelNotFound { model }) => {
                let available = self.generator.list_models().await.unwrap_or_default();
                format!(
                    "Error: Model '{model}' not found. Available models: [{}]",
                    available.join(", ")
                )
            }
            AskError::Generation(other) => format!("Error calling Ollama: {other}"),
            AskError::Embedding(_) | AskError::Store(_) => format!("Error retrieving context: {error}"),
        }
    }

    pub async fn list_documents(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        self.store.list_by_source().await
    }

    pub async fn delete_document(&self, name: &str) -> Result<usize, StoreError> {
        let deleted = self.store.delete_by_source(name).await?;
        info!(document = name, deleted, "delete requested");
        Ok(deleted)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear().await?;
        info!("cleared all documents");
        Ok(())
    }

    pub async fn chunk_count(&self) -> Result<usize, StoreError> {
        self.store.count().await
    }
}
