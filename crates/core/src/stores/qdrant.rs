use crate::traits::VectorStore;
use crate::{ChunkRecord, RetrievedChunk, StoreError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

/// Qdrant only accepts integer or UUID point ids, so the composite chunk id
/// is mapped onto a name-based UUID and kept verbatim in the payload.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

fn source_filter(source: &str) -> Value {
    json!({
        "must": [
            { "key": "source", "match": { "value": source } }
        ]
    })
}

fn point_payload(record: &ChunkRecord) -> Value {
    json!({
        "id": record.chunk.id,
        "source": record.chunk.source,
        "chunk_id": record.chunk.index,
        "text": record.chunk.text,
        "ingested_at": record.ingested_at.to_rfc3339(),
    })
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn points_url(&self, action: &str) -> String {
        format!("{}/points{}", self.collection_url(), action)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!("{status}: {body}"),
        })
    }

    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            Self::check(response).await?;
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        Self::check(response).await?;

        debug!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn existing_ids(&self, ids: &[Uuid]) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .post(self.points_url(""))
            .json(&json!({ "ids": ids, "with_payload": ["id"], "with_vector": false }))
            .send()
            .await?;

        let parsed: Value = Self::check(response).await?.json().await?;
        Ok(parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| point.pointer("/payload/id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_matching(&self, filter: Option<Value>) -> Result<usize, StoreError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.points_url("/count"))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }

        let parsed: Value = Self::check(response).await?.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn add(&self, records: &[ChunkRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(wrong) = records
            .iter()
            .find(|record| record.embedding.len() != self.vector_size)
        {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: wrong.embedding.len(),
            });
        }

        self.ensure_collection().await?;

        let ids = records
            .iter()
            .map(|record| point_id(&record.chunk.id))
            .collect::<Vec<_>>();
        if let Some(existing) = self.existing_ids(&ids).await?.into_iter().next() {
            return Err(StoreError::Conflict { id: existing });
        }

        let points = records
            .iter()
            .zip(ids.iter())
            .map(|(record, id)| {
                json!({
                    "id": id,
                    "vector": record.embedding,
                    "payload": point_payload(record),
                })
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .put(self.points_url("?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::check(response).await?;

        debug!(added = records.len(), collection = %self.collection, "upserted qdrant points");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            });
        }

        let response = self
            .client
            .post(self.points_url("/search"))
            .json(&json!({
                "vector": vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let parsed: Value = Self::check(response).await?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().map(hit_to_chunk).collect())
    }

    async fn list_by_source(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let mut counts = BTreeMap::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": ["source"],
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.points_url("/scroll"))
                .json(&body)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(counts);
            }

            let parsed: Value = Self::check(response).await?.json().await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for point in &points {
                let source = point
                    .pointer("/payload/source")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string();
                *counts.entry(source).or_insert(0) += 1;
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() || points.is_empty() {
                return Ok(counts);
            }
        }
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize, StoreError> {
        let matching = self.count_matching(Some(source_filter(source))).await?;
        if matching == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.points_url("/delete?wait=true"))
            .json(&json!({ "filter": source_filter(source) }))
            .send()
            .await?;
        Self::check(response).await?;

        debug!(source, deleted = matching, "deleted qdrant points");
        Ok(matching)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            Self::check(response).await?;
        }
        self.ensure_collection().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.count_matching(None).await
    }
}

fn hit_to_chunk(hit: &Value) -> RetrievedChunk {
    let text_field = |pointer: &str| {
        hit.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    RetrievedChunk {
        id: text_field("/payload/id"),
        source: text_field("/payload/source"),
        text: text_field("/payload/text"),
        score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
    }
}
