//! PDF/image processor. PDFs are tried for embedded text first; scans and
//! images go to the vision service when one is configured. Whatever text
//! comes back is fed through the free-form line parser, since price lists in
//! documents read like chat price lines.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use pricebot_core::{Error, ProcessorResult, Result, warning};

use crate::whatsapp_text;
use crate::ProcessContext;

pub async fn process(path: &Path, ctx: &ProcessContext) -> Result<ProcessorResult> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| Error::ProcessorFailure(format!("cannot read document: {err}")))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let mut path_taken = "vision";
    let mut text = None;
    if extension == "pdf" {
        match embedded_pdf_text(&bytes) {
            Ok(embedded) if printable_chars(&embedded) >= ctx.pdf_min_text_chars => {
                path_taken = "embedded_text";
                text = Some(embedded);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "pdf text extraction failed, falling back to vision");
            }
        }
    }

    let text = match text {
        Some(text) => text,
        None => {
            if !ctx.capabilities.vision.enabled() {
                let mut result = ProcessorResult::default();
                result.warn(
                    None,
                    warning::DEPENDENCY_UNAVAILABLE,
                    "vision extraction disabled; no text recovered",
                );
                return Ok(result);
            }
            let payload = B64.encode(&bytes);
            match ctx
                .capabilities
                .vision
                .extract_text(&payload, media_type(&extension))
                .await
            {
                Ok(text) => text,
                Err(err) => {
                    let mut result = ProcessorResult::default();
                    result.warn(None, warning::DEPENDENCY_UNAVAILABLE, err.to_string());
                    return Ok(result);
                }
            }
        }
    };

    let mut result = whatsapp_text::parse_lines(&text, &ctx.default_currency);
    result.warnings.push(pricebot_core::RowWarning::new(
        None,
        "extraction_path",
        path_taken,
    ));
    if result.rows.is_empty() {
        result.warn(None, warning::EMPTY_DOCUMENT, "no price lines recovered");
    }
    Ok(result)
}

/// Concatenated embedded text across all PDF pages.
fn embedded_pdf_text(bytes: &[u8]) -> anyhow::Result<String> {
    let doc = lopdf::Document::load_mem(bytes)?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut out = String::new();
    for page in pages {
        if let Ok(text) = doc.extract_text(&[page]) {
            out.push_str(&text);
            out.push('\n');
        }
    }
    Ok(out)
}

fn printable_chars(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .count()
}

fn media_type(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
