//! Text extraction for uploaded documents: PDF, plain text, and ZIP archives
//! of either.
//!
//! Batch uploads are lenient: anything that yields no text is skipped with a
//! warning. A single reference document is strict and reports why it failed.

use std::io::{Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use crate::screening::models::WorkItem;

/// Largest decompressed size accepted for one archive entry.
const MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;
/// Largest decompressed total read out of one archive.
const MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0} (expected .pdf or .txt)")]
    Unsupported(String),

    #[error("could not read {label}: {reason}")]
    Unreadable { label: String, reason: String },

    #[error("{0} contains no extractable text")]
    Empty(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentKind {
    Pdf,
    Text,
    Zip,
}

impl DocumentKind {
    fn from_label(label: &str) -> Option<Self> {
        let extension = Path::new(label)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Text),
            "zip" => Some(DocumentKind::Zip),
            _ => None,
        }
    }
}

/// Extracts the text of one document. Archives are not accepted here.
pub fn extract_document(label: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let text = match DocumentKind::from_label(label) {
        Some(DocumentKind::Pdf) => pdf_text(label, bytes)?,
        Some(DocumentKind::Text) => String::from_utf8_lossy(bytes).into_owned(),
        Some(DocumentKind::Zip) | None => return Err(ExtractError::Unsupported(label.to_string())),
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractError::Empty(label.to_string()));
    }
    Ok(text.to_string())
}

/// Expands an upload into work items, skipping anything unusable.
pub fn extract_work_items(label: &str, bytes: &[u8]) -> Vec<WorkItem> {
    match DocumentKind::from_label(label) {
        Some(DocumentKind::Zip) => extract_archive(label, bytes),
        _ => match extract_document(label, bytes) {
            Ok(text) => vec![WorkItem::new(label, text)],
            Err(e) => {
                warn!("Skipping {label}: {e}");
                vec![]
            }
        },
    }
}

/// Runs `extract_work_items` on the blocking pool; PDF parsing is CPU-bound.
pub async fn extract_upload(label: String, bytes: Bytes) -> Vec<WorkItem> {
    let task_label = label.clone();
    match tokio::task::spawn_blocking(move || extract_work_items(&task_label, &bytes)).await {
        Ok(items) => items,
        Err(e) => {
            warn!("Extraction of {label} aborted: {e}");
            vec![]
        }
    }
}

fn extract_archive(label: &str, bytes: &[u8]) -> Vec<WorkItem> {
    let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(e) => {
            warn!("Skipping archive {label}: {e}");
            return vec![];
        }
    };

    let mut items = Vec::new();
    let mut budget = MAX_ARCHIVE_BYTES;
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping entry {index} of {label}: {e}");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let entry_label = match Path::new(entry.name()).file_name().and_then(|n| n.to_str()) {
            // macOS resource forks and other dotfiles
            Some(name) if !name.starts_with('.') => name.to_string(),
            _ => continue,
        };
        if !matches!(
            DocumentKind::from_label(&entry_label),
            Some(DocumentKind::Pdf | DocumentKind::Text)
        ) {
            continue;
        }

        // Declared sizes come from the uploader; only count bytes actually inflated.
        let limit = MAX_ENTRY_BYTES.min(budget);
        let mut content = Vec::new();
        if let Err(e) = entry.by_ref().take(limit + 1).read_to_end(&mut content) {
            warn!("Skipping {entry_label} in {label}: {e}");
            continue;
        }
        let inflated = content.len() as u64;
        budget = budget.saturating_sub(inflated);
        if inflated > limit {
            if limit < MAX_ENTRY_BYTES {
                warn!("Archive {label} inflates past {MAX_ARCHIVE_BYTES} bytes; ignoring remaining entries");
                break;
            }
            warn!("Skipping {entry_label} in {label}: larger than {MAX_ENTRY_BYTES} bytes");
            continue;
        }

        match extract_document(&entry_label, &content) {
            Ok(text) => items.push(WorkItem::new(entry_label, text)),
            Err(e) => warn!("Skipping {entry_label} in {label}: {e}"),
        }
    }
    items
}

fn pdf_text(label: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match extracted {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Unreadable {
            label: label.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ExtractError::Unreadable {
            label: label.to_string(),
            reason: "malformed PDF".to_string(),
        }),
    }
}
