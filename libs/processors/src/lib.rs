//! Format-specific extraction. A closed set of processors turns a source
//! artefact into `RawOffer` rows:
//!
//! ```text
//! .xlsx/.xls/.csv        -> spreadsheet
//! .pdf/.png/.jpg/...     -> document_text (embedded text, else vision)
//! .txt                   -> whatsapp_text (free-form price lines)
//! ```
//!
//! Selection is explicit: callers either name a processor or let the
//! registry pick one from the file extension. Unknown extensions fail with
//! `unsupported_file_type`; row-level problems never fail a document, they
//! are recorded as warnings on the result.

pub mod document;
pub mod numeric;
pub mod spreadsheet;
pub mod whatsapp_text;

use std::path::Path;

use pricebot_core::{Error, ProcessorResult, Result};
use pricebot_enrich::Capabilities;

/// Everything a processor may need at run time. Built once per job from the
/// config; no processor reads the environment.
#[derive(Clone)]
pub struct ProcessContext {
    pub default_currency: String,
    /// Send heuristically unparseable spreadsheet rows to the LLM extractor.
    pub prefer_llm: bool,
    /// Minimum printable characters for a PDF's embedded text to be trusted.
    pub pdf_min_text_chars: usize,
    pub capabilities: Capabilities,
}

impl ProcessContext {
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
            prefer_llm: false,
            pdf_min_text_chars: 200,
            capabilities: Capabilities::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processor {
    Spreadsheet,
    DocumentText,
    WhatsAppText,
}

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp", "tif", "tiff"];
const TEXT_EXTENSIONS: &[&str] = &["txt"];

impl Processor {
    pub const ALL: &[Processor] = &[
        Processor::Spreadsheet,
        Processor::DocumentText,
        Processor::WhatsAppText,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Spreadsheet => "spreadsheet",
            Self::DocumentText => "document_text",
            Self::WhatsAppText => "whatsapp_text",
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        let ext = ext.as_deref().unwrap_or("");
        match self {
            Self::Spreadsheet => SPREADSHEET_EXTENSIONS.contains(&ext),
            Self::DocumentText => DOCUMENT_EXTENSIONS.contains(&ext),
            Self::WhatsAppText => TEXT_EXTENSIONS.contains(&ext),
        }
    }

    pub async fn process(&self, path: &Path, ctx: &ProcessContext) -> Result<ProcessorResult> {
        match self {
            Self::Spreadsheet => spreadsheet::process(path, ctx).await,
            Self::DocumentText => document::process(path, ctx).await,
            Self::WhatsAppText => whatsapp_text::process(path, ctx).await,
        }
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Name-keyed lookup plus extension-based selection over the closed
/// processor set.
#[derive(Clone, Copy, Default)]
pub struct ProcessorRegistry;

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, name: &str) -> Result<Processor> {
        Processor::by_name(name)
            .ok_or_else(|| Error::invalid(format!("unknown processor: {name}")))
    }

    pub fn select_for(&self, path: &Path) -> Result<Processor> {
        Processor::ALL
            .iter()
            .copied()
            .find(|p| p.accepts(path))
            .ok_or_else(|| {
                Error::UnsupportedFileType(extension_of(path).unwrap_or_else(|| "none".into()))
            })
    }

    /// Caller-named processor when given, extension-based selection otherwise.
    pub fn select(&self, requested: Option<&str>, path: &Path) -> Result<Processor> {
        match requested {
            Some(name) => self.get(name),
            None => self.select_for(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_table() {
        let registry = ProcessorRegistry::new();
        for (file, expected) in [
            ("list.xlsx", Processor::Spreadsheet),
            ("list.XLS", Processor::Spreadsheet),
            ("list.csv", Processor::Spreadsheet),
            ("scan.pdf", Processor::DocumentText),
            ("photo.JPG", Processor::DocumentText),
            ("photo.webp", Processor::DocumentText),
            ("chat.txt", Processor::WhatsAppText),
        ] {
            assert_eq!(
                registry.select_for(Path::new(file)).unwrap(),
                expected,
                "{file}"
            );
        }
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let registry = ProcessorRegistry::new();
        let err = registry.select_for(Path::new("data.docx")).unwrap_err();
        assert_eq!(err.kind(), "unsupported_file_type");
        let err = registry.select_for(Path::new("noext")).unwrap_err();
        assert_eq!(err.kind(), "unsupported_file_type");
    }

    #[test]
    fn named_lookup_beats_extension() {
        let registry = ProcessorRegistry::new();
        let processor = registry
            .select(Some("whatsapp_text"), Path::new("export.csv"))
            .unwrap();
        assert_eq!(processor, Processor::WhatsAppText);
        assert!(registry.select(Some("bogus"), Path::new("a.csv")).is_err());
    }
}
