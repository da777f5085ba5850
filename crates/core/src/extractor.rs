use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait TextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

impl TextExtractor for LopdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let pages = self.extract_pages(path)?;
        debug!(path = %path.display(), pages = pages.len(), "extracted pdf text");

        let mut text = String::new();
        for page in pages {
            text.push_str(&page.text);
            text.push('\n');
        }
        Ok(text)
    }
}

/// Reads any non-PDF file as UTF-8.
#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn extract_document_text(path: &Path) -> Result<String, IngestError> {
    if !path.exists() {
        return Err(IngestError::NotFound(path.display().to_string()));
    }

    if is_pdf(path) {
        LopdfExtractor.extract_text(path)
    } else {
        PlainTextExtractor.extract_text(path)
    }
}
