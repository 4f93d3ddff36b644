//! Evidence text extraction.
//!
//! The file kind is decided from the extension before the bytes are
//! touched. Plain text must be valid UTF-8; PDFs go through
//! `pdf_extract` and are filed under the same stem with a `.txt`
//! extension, since what gets indexed is the extracted text.

use std::path::Path;

use casefile_core::EngineError;

/// Kinds of upload the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
}

impl FileKind {
    /// Classify by extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, EngineError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("txt") | Some("md") => Ok(FileKind::Text),
            Some("pdf") => Ok(FileKind::Pdf),
            _ => Err(EngineError::UnsupportedFileType(filename.to_string())),
        }
    }
}

/// Text ready to index, and the name it is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEvidence {
    pub filename: String,
    pub text: String,
}

/// Strip any directory components from an uploaded name.
pub fn sanitize_filename(filename: &str) -> Result<String, EngineError> {
    Path::new(filename.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && !n.starts_with('.'))
        .map(str::to_string)
        .ok_or_else(|| EngineError::UnsupportedFileType(filename.to_string()))
}

/// Extract indexable text from an upload.
///
/// # Errors
///
/// - [`EngineError::UnsupportedFileType`] for other extensions and for
///   text files that are not UTF-8.
/// - [`EngineError::EmptyDocument`] when a PDF cannot be read or any file
///   yields only whitespace.
pub fn extract_evidence(filename: &str, bytes: &[u8]) -> Result<ExtractedEvidence, EngineError> {
    let filename = sanitize_filename(filename)?;
    let kind = FileKind::from_filename(&filename)?;

    let (filed_as, text) = match kind {
        FileKind::Text => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| EngineError::UnsupportedFileType(format!("{} (not UTF-8)", filename)))?
                .to_string();
            (filename, text)
        }
        FileKind::Pdf => {
            let text = pdf_extract::extract_text_from_mem(bytes)
                .map_err(|_| EngineError::EmptyDocument(filename.clone()))?;
            (pdf_text_name(&filename), text)
        }
    };

    if text.trim().is_empty() {
        return Err(EngineError::EmptyDocument(filed_as));
    }

    Ok(ExtractedEvidence {
        filename: filed_as,
        text,
    })
}

/// `report.pdf` → `report.txt`.
pub fn pdf_text_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    format!("{}.txt", stem)
}
