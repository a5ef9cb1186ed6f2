use crate::completion_client::{CompletionError, CompletionRequest, CompletionService};
use thiserror::Error;

/// Every failed analysis starts with this; it is the only way to tell a
/// failure from a model answer once `analyze` has rendered it.
pub const ANALYSIS_ERROR_PREFIX: &str = "Error in AI analysis:";

const SYSTEM_PROMPT: &str = "You are a Finance Analyzer AI. Analyze the provided financial report text \
and answer the user's query. The text may contain several documents; each document except the last \
is followed by the marker <endofthefile>.

Respond in raw, well-formatted Markdown without escaping syntax. Use **bold** for key figures \
(e.g., **Revenue: $1M**), *italic* for terms, | tables | for financial data (e.g., | Metric | Value |), \
and describe charts/graphs in text or simple markdown representations. Include newlines for \
readability. Do not use backticks or escapes for markdown; output pure markdown for proper rendering.";

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

pub fn user_message(text: &str, query: &str) -> String {
    format!("Financial report text:\n{}\n\nUser query: {}", text, query)
}

/// Sends the whole combined text with the query and returns the model's
/// Markdown untouched.
pub async fn try_analyze(
    service: &dyn CompletionService,
    text: &str,
    query: &str,
    max_reply_tokens: u32,
) -> Result<String, AnalysisError> {
    if !service.has_credential() {
        return Err(CompletionError::MissingCredential.into());
    }
    // The query can quote report contents, so it stays out of info-level logs.
    tracing::info!("Analyzing {} chars", text.len());
    tracing::debug!("Analysis query: {}", query);
    let reply = service
        .complete(CompletionRequest {
            system_message: SYSTEM_PROMPT.to_string(),
            user_message: user_message(text, query),
            max_reply_tokens,
        })
        .await?;
    Ok(reply)
}

/// Like `try_analyze`, but a failure comes back as an error string in place of
/// the answer.
pub async fn analyze(
    service: &dyn CompletionService,
    text: &str,
    query: &str,
    max_reply_tokens: u32,
) -> String {
    match try_analyze(service, text, query, max_reply_tokens).await {
        Ok(markdown) => markdown,
        Err(e) => {
            tracing::error!("Analysis failed: {}", e);
            format!("{} {}", ANALYSIS_ERROR_PREFIX, e)
        }
    }
}
