use crate::traits::{FragmentSink, Generator};
use crate::GenerationError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Sent as `keepalive`; negative keeps the model loaded indefinitely.
    pub keep_alive: i64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma2:2b".to_string(),
            keep_alive: -1,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keepalive: i64,
}

/// One record of the newline-delimited response stream.
#[derive(Debug, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Turns raw response bytes into text fragments, one per JSON line.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence; only
/// complete lines are parsed, and a line that is not valid UTF-8 JSON is
/// `Malformed`. Lines after a `done: true` record are ignored.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl NdjsonDecoder {
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, GenerationError> {
        self.buffer.extend_from_slice(bytes);
        let mut fragments = Vec::new();

        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=position).collect();
            self.decode_line(&line, &mut fragments)?;
        }

        Ok(fragments)
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Result<Vec<String>, GenerationError> {
        let line = std::mem::take(&mut self.buffer);
        let mut fragments = Vec::new();
        self.decode_line(&line, &mut fragments)?;
        Ok(fragments)
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<String>) -> Result<(), GenerationError> {
        if self.done {
            return Ok(());
        }

        let Some(start) = line.iter().position(|byte| !byte.is_ascii_whitespace()) else {
            return Ok(());
        };
        let end = line
            .iter()
            .rposition(|byte| !byte.is_ascii_whitespace())
            .map_or(line.len(), |last| last + 1);
        let trimmed = &line[start..end];

        let chunk: GenerateChunk =
            serde_json::from_slice(trimmed).map_err(|source| GenerationError::Malformed {
                line: String::from_utf8_lossy(trimmed).into_owned(),
                source,
            })?;

        if !chunk.response.is_empty() {
            out.push(chunk.response);
        }
        self.done = chunk.done;
        Ok(())
    }
}

/// Lazy, single-pass sequence of fragments read from a streaming response.
pub struct GenerationStream {
    response: Response,
    decoder: NdjsonDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl GenerationStream {
    fn new(response: Response) -> Self {
        Self {
            response,
            decoder: NdjsonDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Waits for the next fragment; `None` once the stream is exhausted.
    pub async fn next_fragment(&mut self) -> Option<Result<String, GenerationError>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Some(Ok(fragment));
            }

            if self.finished {
                return None;
            }

            let decoded = match self.response.chunk().await {
                Ok(Some(bytes)) => self.decoder.push(&bytes),
                Ok(None) => {
                    self.finished = true;
                    self.decoder.finish()
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error.into()));
                }
            };

            match decoded {
                Ok(fragments) => self.pending.extend(fragments),
                Err(error) => {
                    self.finished = true;
                    self.pending.clear();
                    return Some(Err(error));
                }
            }

            if self.decoder.is_done() {
                self.finished = true;
            }
        }
    }
}

/// Parses `base_url` as a directory, so API paths joined onto it keep any
/// path prefix a reverse proxy puts in front of the server.
pub(crate) fn service_root(base_url: &str) -> Result<Url, url::ParseError> {
    let mut root = Url::parse(base_url)?;
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    Ok(root)
}

/// HTTP client for an Ollama generation server.
pub struct OllamaClient {
    client: Client,
    base_url: Url,
    config: GenerationConfig,
}

impl OllamaClient {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        Ok(Self {
            client: Client::new(),
            base_url: service_root(&config.base_url)?,
            config,
        })
    }

    fn unavailable(&self, reason: impl ToString) -> GenerationError {
        GenerationError::ServiceUnavailable {
            url: self.base_url.to_string(),
            reason: reason.to_string(),
        }
    }

    fn classify(&self, error: reqwest::Error) -> GenerationError {
        if error.is_connect() {
            self.unavailable(error)
        } else {
            GenerationError::Http(error)
        }
    }

    async fn post_generate(&self, prompt: &str, stream: bool) -> Result<Response, GenerationError> {
        self.health_check().await?;

        info!(model = %self.config.model, prompt_chars = prompt.chars().count(), stream, "calling generation service");

        let response = self
            .client
            .post(self.base_url.join("api/generate")?)
            .json(&GenerateRequest {
                model: &self.config.model,
                prompt,
                stream,
                keepalive: self.config.keep_alive,
            })
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(GenerationError::ModelNotFound {
                model: self.config.model.clone(),
            }),
            status => {
                let details = response.text().await.unwrap_or_default();
                Err(GenerationError::Status {
                    status: status.as_u16(),
                    details,
                })
            }
        }
    }

    /// Starts a streaming generation and hands back the fragment sequence.
    pub async fn start_stream(&self, prompt: &str) -> Result<GenerationStream, GenerationError> {
        let response = self.post_generate(prompt, true).await?;
        Ok(GenerationStream::new(response))
    }

    pub async fn generate_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.post_generate(prompt, false).await?;
        let body = response.bytes().await?;
        let chunk: GenerateChunk =
            serde_json::from_slice(&body).map_err(|source| GenerationError::Malformed {
                line: String::from_utf8_lossy(&body).into_owned(),
                source,
            })?;
        Ok(chunk.response)
    }
}

#[async_trait]
impl Generator for OllamaClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        if response.status() != StatusCode::OK {
            return Err(self.unavailable(format!("health check returned {}", response.status())));
        }

        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        stream: bool,
        on_fragment: FragmentSink<'_>,
    ) -> Result<String, GenerationError> {
        if !stream {
            let answer = self.generate_once(prompt).await?;
            on_fragment(&answer);
            return Ok(answer);
        }

        let mut fragments = self.start_stream(prompt).await?;
        let mut answer = String::new();
        while let Some(fragment) = fragments.next_fragment().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            answer.push_str(&fragment);
        }

        debug!(answer_chars = answer.chars().count(), "generation finished");
        Ok(answer)
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .client
            .get(self.base_url.join("api/tags")?)
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, details });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }
}
