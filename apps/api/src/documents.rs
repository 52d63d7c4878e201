//! Resume text extraction from uploaded PDFs.

use thiserror::Error;

/// Uploads larger than this are rejected before parsing.
pub const MAX_RESUME_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Uploaded file is empty")]
    Empty,

    #[error("Uploaded file exceeds {MAX_RESUME_BYTES} bytes")]
    TooLarge,

    #[error("Could not read PDF: {0}")]
    Unreadable(String),

    #[error("PDF contains no extractable text")]
    NoText,
}

/// Extracts plain text from a PDF, one line per page, whitespace collapsed.
///
/// CPU-bound; call from `spawn_blocking`.
pub fn extract_resume_text(bytes: &[u8]) -> Result<String, DocumentError> {
    if bytes.is_empty() {
        return Err(DocumentError::Empty);
    }
    if bytes.len() > MAX_RESUME_BYTES {
        return Err(DocumentError::TooLarge);
    }

    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| DocumentError::Unreadable(e.to_string()))?;

    let text = collapse_whitespace(&raw);
    if text.is_empty() {
        return Err(DocumentError::NoText);
    }
    Ok(text)
}

/// Collapses runs of spaces within a page and drops blank lines.
/// Page breaks (form feeds) become newlines.
fn collapse_whitespace(raw: &str) -> String {
    raw.split(['\n', '\x0c'])
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        let raw = "Jane   Doe\n\n  Senior\tEngineer \x0cRust,  Go\n";
        assert_eq!(collapse_whitespace(raw), "Jane Doe\nSenior Engineer\nRust, Go");
    }

    #[test]
    fn test_empty_upload_rejected() {
        assert!(matches!(extract_resume_text(&[]), Err(DocumentError::Empty)));
    }

    #[test]
    fn test_oversized_upload_rejected() {
        let bytes = vec![0u8; MAX_RESUME_BYTES + 1];
        assert!(matches!(extract_resume_text(&bytes), Err(DocumentError::TooLarge)));
    }

    #[test]
    fn test_non_pdf_is_unreadable() {
        let result = extract_resume_text(b"definitely not a pdf");
        assert!(matches!(result, Err(DocumentError::Unreadable(_))));
    }
}
