//! Document parsing into uniform text segments
//!
//! Formats are a closed set of variants dispatched through one function. PDF
//! extraction shells out to `pdftotext` (poppler); text-like files are read
//! whole; structured JSON records contribute their conventional text fields.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported file type: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("PDF extraction failed: {0}")]
    PdfExtraction(String),

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closed set of supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    /// Markdown and plain text
    TextLike,
    /// JSON objects or arrays carrying text fields
    StructuredRecords,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match extension.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "md" | "txt" => Ok(DocumentFormat::TextLike),
            "json" => Ok(DocumentFormat::StructuredRecords),
            _ => Err(ParseError::UnsupportedFormat { extension }),
        }
    }
}

/// A parsed text segment with its page (or record) number
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub page: usize,
}

/// Parse a document file into text segments
pub fn parse_document(path: &Path) -> Result<Vec<Segment>, ParseError> {
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Pdf => parse_pdf(path),
        DocumentFormat::TextLike => parse_text(path),
        DocumentFormat::StructuredRecords => parse_json(path),
    }
}

/// Extract text page-by-page; pdftotext separates pages with form feeds
fn parse_pdf(path: &Path) -> Result<Vec<Segment>, ParseError> {
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg(path)
        .arg("-")
        .output()
        .map_err(|e| {
            ParseError::PdfExtraction(format!("pdftotext could not be run: {} (is poppler installed?)", e))
        })?;

    if !output.status.success() {
        return Err(ParseError::PdfExtraction(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let text = String::from_utf8_lossy(&output.stdout);

    let segments = text
        .split('\u{c}')
        .enumerate()
        .filter_map(|(i, page)| {
            let page_text = page.trim();
            if page_text.is_empty() {
                None
            } else {
                Some(Segment {
                    text: page_text.to_string(),
                    page: i + 1,
                })
            }
        })
        .collect();

    Ok(segments)
}

/// Read an entire markdown or plain-text file as one segment
fn parse_text(path: &Path) -> Result<Vec<Segment>, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Segment {
        text: trimmed.to_string(),
        page: 1,
    }])
}

const OBJECT_TEXT_KEYS: [&str; 4] = ["text", "content", "body", "description"];
const RECORD_TEXT_KEYS: [&str; 3] = ["text", "content", "body"];

/// Extract text fields from a JSON object or array of records
fn parse_json(path: &Path) -> Result<Vec<Segment>, ParseError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let data: serde_json::Value = serde_json::from_str(&raw)?;

    match data {
        serde_json::Value::Object(map) => {
            let parts: Vec<&str> = OBJECT_TEXT_KEYS
                .iter()
                .filter_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .collect();

            if parts.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![Segment {
                    text: parts.join("\n\n"),
                    page: 1,
                }])
            }
        }
        serde_json::Value::Array(items) => {
            let mut segments = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match item {
                    serde_json::Value::Object(map) => {
                        if let Some(text) = RECORD_TEXT_KEYS
                            .iter()
                            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
                        {
                            segments.push(Segment {
                                text: text.to_string(),
                                page: i + 1,
                            });
                        }
                    }
                    serde_json::Value::String(s) => {
                        segments.push(Segment {
                            text: s.clone(),
                            page: i + 1,
                        });
                    }
                    _ => {}
                }
            }
            Ok(segments)
        }
        _ => Ok(Vec::new()),
    }
}
