use anyhow::{Context, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text_by_pages;
use std::fs;
use std::path::Path;

/// One page of source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub content: String,
    /// 1-based position of the page in its document
    pub page_number: u32,
}

impl Page {
    pub fn new(content: impl Into<String>, page_number: u32) -> Self {
        Page {
            content: content.into(),
            page_number,
        }
    }
}

/// Represents a document with its pages and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// Pages in document order
    pub pages: Vec<Page>,
    /// The document's file name (used as document ID)
    pub document_id: String,
    /// The document's MIME type
    pub mime_type: String,
}

impl Document {
    /// Create a new document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .context("Invalid file name")?
            .to_str()
            .context("Invalid file name encoding")?
            .to_string();

        let mime = from_path(path).first_or_octet_stream();
        let mime_type = mime.to_string();
        debug!("Detected MIME type: {}", mime_type);

        let pages = read_document_pages(path, &mime_type)?;
        info!("Loaded {} pages from {}", pages.len(), file_name);

        Ok(Document {
            pages,
            document_id: file_name,
            mime_type,
        })
    }
}

/// Read the pages of a document based on its MIME type
pub fn read_document_pages<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<Vec<Page>> {
    let path = file_path.as_ref();

    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let raw_pages = extract_text_by_pages(path)
                .with_context(|| format!("Failed to extract text from PDF: {}", path.display()))?;

            let pages: Vec<Page> = raw_pages
                .iter()
                .enumerate()
                .map(|(idx, text)| Page::new(normalize_whitespace(text), idx as u32 + 1))
                .collect();

            if pages.iter().all(|p| p.content.is_empty()) {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }

            Ok(pages)
        }

        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?;
            Ok(split_into_pages(&content))
        }

        _ => Err(anyhow::anyhow!(
            "Unsupported document format: {}. Only text and PDF files are supported.",
            mime_type
        )),
    }
}

/// Split raw text into pages, one per line.
///
/// Blank lines still consume a page number so that page numbers match line
/// numbers in the source.
pub fn split_into_pages(text: &str) -> Vec<Page> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| Page::new(line.trim(), idx as u32 + 1))
        .collect()
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // Keep at most a paragraph break
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}
