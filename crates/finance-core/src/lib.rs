pub mod analyzer;
pub mod completion_client;
pub mod config;
pub mod document;
pub mod document_combiner;
pub mod session;
pub mod suggestions;
pub mod text_extractor;

pub use completion_client::{CompletionRequest, CompletionService, OpenRouterClient};
pub use config::CompletionConfig;
pub use document::{Diagnostic, ExtractedText, Severity, UploadedDocument};
pub use document_combiner::{CombinedText, DOCUMENT_SEPARATOR, MAX_DOCUMENTS, combine};
pub use session::{MarkdownExport, Session, SessionError};
pub use text_extractor::{Extractor, FormatExtractor, extract};
