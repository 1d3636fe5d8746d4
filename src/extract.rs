//! PDF text extraction.
//!
//! Loaders supply raw bytes; this module returns plain UTF-8 text with all
//! pages concatenated.

/// Extraction error. Callers skip the document and carry on.
#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Empty,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Empty => write!(f, "PDF contains no extractable text"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts the text of every page of a PDF.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}
