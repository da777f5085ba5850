use crate::chunking::{chunk_text, ChunkingConfig};
use crate::extractor::extract_document_text;
use crate::{Chunk, IngestError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DOCUMENT_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Chunks of one document, ready to embed.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub name: String,
    pub source_path: String,
    pub checksum: String,
    pub chunks: Vec<Chunk>,
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Default document name: the file's base name.
pub fn document_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

pub fn prepare_document(
    path: &Path,
    name: Option<&str>,
    config: ChunkingConfig,
) -> Result<PreparedDocument, IngestError> {
    let text = extract_document_text(path)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => document_name(path)?,
    };

    let chunks = chunk_text(&text, config)?
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk::new(&name, index as u64, text))
        .collect::<Vec<_>>();

    if chunks.is_empty() {
        return Err(IngestError::EmptyDocument { name });
    }

    Ok(PreparedDocument {
        name,
        source_path: path.to_string_lossy().to_string(),
        checksum: digest_file(path)?,
        chunks,
    })
}
