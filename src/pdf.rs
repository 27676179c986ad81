use crate::conversation::sanitize;
use anyhow::{Context, Result};
use lopdf::Document;

pub const NO_UPLOAD: &str = "No PDF uploaded.";
pub const NO_TEXT: &str = "Could not extract text from the PDF.";

/// Concatenate the text of every page, in page order.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    let document = Document::load_mem(bytes).context("Failed to parse PDF")?;

    let mut text = String::new();
    for (page_number, _) in document.get_pages() {
        let page_text = document
            .extract_text(&[page_number])
            .with_context(|| format!("Failed to extract text from page {}", page_number))?;
        text.push_str(&sanitize(page_text));
    }
    Ok(text)
}

/// Turn an optional upload into display text. Never fails: problems are
/// described in the returned string.
pub fn process_pdf(upload: Option<&[u8]>) -> String {
    let Some(bytes) = upload else {
        return NO_UPLOAD.to_string();
    };

    match extract_text(bytes) {
        Ok(text) if text.trim().is_empty() => NO_TEXT.to_string(),
        Ok(text) => {
            tracing::debug!(bytes = bytes.len(), chars = text.chars().count(), "extracted PDF text");
            text
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to process PDF");
            format!("Error processing PDF: {}", e)
        }
    }
}
