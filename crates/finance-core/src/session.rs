use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::analyzer;
use crate::completion_client::CompletionService;
use crate::document::UploadedDocument;
use crate::document_combiner::{CombinedText, combine_with};
use crate::suggestions::{self, SuggestionSet};
use crate::text_extractor::Extractor;

pub const EXPORT_FILE_NAME: &str = "financial_analysis.md";
pub const EXPORT_MIME_TYPE: &str = "text/markdown";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Please enter a query to analyze.")]
    EmptyQuery,
    #[error("Upload at least one document first.")]
    NoDocuments,
    #[error("No suggestions have been generated yet.")]
    NoSuggestions,
    #[error("Suggestion {0} does not exist; pick 1 to 3.")]
    SuggestionOutOfRange(usize),
}

/// The current analysis, packaged as a file download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownExport {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    pub contents: String,
}

/// State of one user's session. Every UI trigger maps to one method here.
#[derive(Debug, Clone)]
pub struct Session {
    created_at: DateTime<Utc>,
    // Ordered names of the last upload, used to skip re-extraction.
    uploaded_names: Vec<String>,
    combined: CombinedText,
    suggestions: Option<SuggestionSet>,
    query: String,
    analysis: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            uploaded_names: Vec::new(),
            combined: CombinedText::default(),
            suggestions: None,
            query: String::new(),
            analysis: None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn uploaded_names(&self) -> &[String] {
        &self.uploaded_names
    }

    pub fn combined(&self) -> &CombinedText {
        &self.combined
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    /// File set changed. Re-extracts only when the ordered list of names differs
    /// from the previous upload; otherwise the cached text is returned as is.
    pub fn set_documents<E: Extractor + ?Sized>(
        &mut self,
        documents: &[UploadedDocument],
        extractor: &E,
    ) -> &CombinedText {
        let same_names = documents.len() == self.uploaded_names.len()
            && documents
                .iter()
                .zip(&self.uploaded_names)
                .all(|(doc, name)| &doc.name == name);
        if same_names {
            tracing::debug!("Document set unchanged; reusing extracted text");
            return &self.combined;
        }

        self.uploaded_names = documents.iter().map(|doc| doc.name.clone()).collect();
        self.combined = combine_with(extractor, documents);
        self.suggestions = None;
        self.analysis = None;
        &self.combined
    }

    /// Suggestions for the current text, generated once and then cached.
    /// `None` while there is no text to suggest from.
    pub async fn suggestions(
        &mut self,
        service: &dyn CompletionService,
        max_reply_tokens: u32,
    ) -> Option<&SuggestionSet> {
        if self.combined.is_empty() {
            return None;
        }
        if self.suggestions.is_none() {
            let generated =
                suggestions::suggest(service, &self.combined.text, max_reply_tokens).await;
            self.suggestions = Some(generated);
        }
        self.suggestions.as_ref()
    }

    /// Copies suggestion `index` (1-based, as shown to the user) into the query.
    pub fn select_suggestion(&mut self, index: usize) -> Result<&str, SessionError> {
        let suggestions = self.suggestions.as_ref().ok_or(SessionError::NoSuggestions)?;
        let chosen = index
            .checked_sub(1)
            .and_then(|i| suggestions.get(i))
            .ok_or(SessionError::SuggestionOutOfRange(index))?;
        self.query = chosen.clone();
        Ok(&self.query)
    }

    pub async fn analyze(
        &mut self,
        service: &dyn CompletionService,
        query: &str,
        max_reply_tokens: u32,
    ) -> Result<&str, SessionError> {
        self.query = query.to_string();
        if query.trim().is_empty() {
            return Err(SessionError::EmptyQuery);
        }
        if self.uploaded_names.is_empty() {
            return Err(SessionError::NoDocuments);
        }

        let result = analyzer::analyze(service, &self.combined.text, query, max_reply_tokens).await;
        Ok(self.analysis.insert(result).as_str())
    }

    pub fn export(&self) -> Option<MarkdownExport> {
        self.analysis.as_ref().map(|markdown| MarkdownExport {
            file_name: EXPORT_FILE_NAME,
            mime_type: EXPORT_MIME_TYPE,
            contents: markdown.clone(),
        })
    }

    /// Drops the documents and everything derived from them.
    pub fn clear(&mut self) {
        self.uploaded_names.clear();
        self.combined = CombinedText::default();
        self.suggestions = None;
        self.query.clear();
        self.analysis = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ANALYSIS_ERROR_PREFIX;
    use crate::completion_client::tests::ScriptedCompletion;
    use crate::document_combiner::tests::CountingExtractor;
    use crate::suggestions::fallback_suggestions;

    fn docs(names: &[&str]) -> Vec<UploadedDocument> {
        names
            .iter()
            .map(|name| UploadedDocument::new(*name, format!("contents of {}", name).into_bytes()))
            .collect()
    }

    #[test]
    fn unchanged_names_do_not_re_extract() {
        let extractor = CountingExtractor::default();
        let mut session = Session::new();

        session.set_documents(&docs(&["a.txt", "b.txt"]), &extractor);
        assert_eq!(extractor.calls(), 2);

        session.set_documents(&docs(&["a.txt", "b.txt"]), &extractor);
        assert_eq!(extractor.calls(), 2);

        // Same names in a different order is a different document set.
        session.set_documents(&docs(&["b.txt", "a.txt"]), &extractor);
        assert_eq!(extractor.calls(), 4);
        assert!(session.combined().text.starts_with("contents of b.txt"));
    }

    #[tokio::test]
    async fn suggestions_are_cached_until_documents_change() {
        let extractor = CountingExtractor::default();
        let service = ScriptedCompletion::replying("1. A\n2. B\n3. C");
        let mut session = Session::new();

        assert!(session.suggestions(&service, 300).await.is_none());

        session.set_documents(&docs(&["a.txt"]), &extractor);
        session.suggestions(&service, 300).await;
        session.suggestions(&service, 300).await;
        assert_eq!(service.calls(), 1);

        session.set_documents(&docs(&["a.txt", "b.txt"]), &extractor);
        session.suggestions(&service, 300).await;
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn selecting_a_suggestion_sets_the_query() {
        let service = ScriptedCompletion::failing("down");
        let mut session = Session::new();
        assert_eq!(session.select_suggestion(1), Err(SessionError::NoSuggestions));

        session.set_documents(&docs(&["a.txt"]), &CountingExtractor::default());
        session.suggestions(&service, 300).await;

        assert_eq!(session.select_suggestion(2).unwrap(), fallback_suggestions()[1]);
        assert_eq!(session.query(), "Summarize revenue trends.");
        assert_eq!(session.select_suggestion(0), Err(SessionError::SuggestionOutOfRange(0)));
        assert_eq!(session.select_suggestion(4), Err(SessionError::SuggestionOutOfRange(4)));
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_call() {
        let service = ScriptedCompletion::replying("answer");
        let mut session = Session::new();
        session.set_documents(&docs(&["a.txt"]), &CountingExtractor::default());

        let err = session.analyze(&service, "   ", 2000).await.unwrap_err();
        assert_eq!(err, SessionError::EmptyQuery);
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn analysis_needs_documents() {
        let service = ScriptedCompletion::replying("answer");
        let mut session = Session::new();
        let err = session.analyze(&service, "Revenue?", 2000).await.unwrap_err();
        assert_eq!(err, SessionError::NoDocuments);
    }

    #[tokio::test]
    async fn analysis_is_stored_and_exported() {
        let service = ScriptedCompletion::replying("**Revenue: $1M**");
        let mut session = Session::new();
        assert!(session.export().is_none());

        session.set_documents(&docs(&["a.txt"]), &CountingExtractor::default());
        let answer = session.analyze(&service, "Revenue?", 2000).await.unwrap();
        assert_eq!(answer, "**Revenue: $1M**");

        let export = session.export().unwrap();
        assert_eq!(export.file_name, "financial_analysis.md");
        assert_eq!(export.mime_type, "text/markdown");
        assert_eq!(export.contents, "**Revenue: $1M**");
    }

    #[tokio::test]
    async fn failed_analysis_is_stored_like_an_answer() {
        let service = ScriptedCompletion::failing("boom");
        let mut session = Session::new();
        session.set_documents(&docs(&["a.txt"]), &CountingExtractor::default());
        let answer = session.analyze(&service, "Revenue?", 2000).await.unwrap();
        assert!(answer.starts_with(ANALYSIS_ERROR_PREFIX));
        assert!(session.export().is_some());
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let extractor = CountingExtractor::default();
        let service = ScriptedCompletion::replying("1. A\n2. B\n3. C");
        let mut session = Session::new();
        session.set_documents(&docs(&["a.txt"]), &extractor);
        session.suggestions(&service, 300).await;
        session.analyze(&service, "q", 2000).await.unwrap();

        session.clear();
        assert!(session.combined().is_empty());
        assert!(session.uploaded_names().is_empty());
        assert!(session.analysis().is_none());
        assert_eq!(session.query(), "");

        // The same upload after a clear is extracted again.
        session.set_documents(&docs(&["a.txt"]), &extractor);
        assert_eq!(extractor.calls(), 2);
    }
}
