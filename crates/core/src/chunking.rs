use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Chunks whose trimmed length does not exceed this are dropped.
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 200,
            min_chars: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap, self.chunk_size
            )));
        }

        Ok(())
    }
}

/// Half-open range of character positions a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

/// Computes the raw windows over `chars`, before trimming and length filtering.
///
/// A window that does not reach the end of the text is shrunk to end right
/// after the last `.` or newline it contains, as long as that boundary lies
/// past the window midpoint. Each following window starts `overlap`
/// characters before the previous end.
pub fn chunk_spans(chars: &[char], config: ChunkingConfig) -> Vec<ChunkSpan> {
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + config.chunk_size).min(len);

        if start + config.chunk_size < len {
            let boundary = chars[start..end]
                .iter()
                .rposition(|c| *c == '.' || *c == '\n')
                .map(|offset| start + offset);

            if let Some(boundary) = boundary {
                if boundary > start + config.chunk_size / 2 {
                    end = boundary + 1;
                }
            }
        }

        spans.push(ChunkSpan { start, end });

        if end >= len {
            break;
        }

        start = end.saturating_sub(config.overlap).max(start + 1);
    }

    spans
}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let chunks = chunk_spans(&chars, config)
        .into_iter()
        .map(|span| {
            chars[span.start..span.end]
                .iter()
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|chunk| chunk.chars().count() > config.min_chars)
        .collect();

    Ok(chunks)
}
