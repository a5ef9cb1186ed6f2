use crate::document::{Diagnostic, UploadedDocument};
use crate::text_extractor::{Extractor, FormatExtractor};

/// Marks the end of one document inside the combined text. The analysis prompt
/// tells the model about it, so it has to stay byte-for-byte the same.
pub const DOCUMENT_SEPARATOR: &str = "<endofthefile>\n";

/// Only the first documents of an upload are processed.
pub const MAX_DOCUMENTS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedText {
    pub text: String,
    /// Names of the documents that went into `text`, in order.
    pub file_names: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// How many supplied documents were dropped by `MAX_DOCUMENTS`.
    pub dropped: usize,
}

impl CombinedText {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Truncation notice for the UI, if anything was dropped.
    pub fn truncation_notice(&self) -> Option<Diagnostic> {
        (self.dropped > 0).then(|| {
            Diagnostic::warning(format!(
                "Only the first {} files are processed; {} ignored.",
                MAX_DOCUMENTS, self.dropped
            ))
        })
    }
}

pub fn combine(documents: &[UploadedDocument]) -> CombinedText {
    combine_with(&FormatExtractor, documents)
}

/// Extracts documents one after another, in the order given, and joins them
/// with `DOCUMENT_SEPARATOR`.
pub fn combine_with<E: Extractor + ?Sized>(
    extractor: &E,
    documents: &[UploadedDocument],
) -> CombinedText {
    let kept = &documents[..documents.len().min(MAX_DOCUMENTS)];
    let dropped = documents.len() - kept.len();
    if dropped > 0 {
        tracing::warn!("Ignoring {} document(s) beyond the first {}", dropped, MAX_DOCUMENTS);
    }

    let mut combined = CombinedText {
        dropped,
        ..CombinedText::default()
    };
    for (i, document) in kept.iter().enumerate() {
        let extracted = extractor.extract(document);
        combined.text.push_str(&extracted.text);
        if i + 1 < kept.len() {
            combined.text.push_str(DOCUMENT_SEPARATOR);
        }
        combined.file_names.push(document.name.clone());
        combined.diagnostics.extend(extracted.diagnostic);
    }

    tracing::info!(
        "Combined {} document(s) into {} chars",
        kept.len(),
        combined.text.len()
    );
    combined
}
