use crate::completion_client::{CompletionError, CompletionRequest, CompletionService};

/// Only this many leading characters of the combined text are sent for suggestions.
pub const SUGGESTION_PREFIX_CHARS: usize = 2000;

pub const FALLBACK_SUGGESTIONS: [&str; 3] = [
    "What are the key financial metrics?",
    "Summarize revenue trends.",
    "Analyze profitability.",
];

const SYSTEM_PROMPT: &str = "You are a Finance Analyzer AI. Generate exactly 3 relevant, random questions \
for analyzing the provided financial report text. Output as a numbered list: \
1. Question one\n2. Question two\n3. Question three";

const LIST_PREFIXES: [&str; 4] = [".", "1.", "2.", "3."];

/// Always exactly three questions.
pub type SuggestionSet = [String; 3];

pub fn fallback_suggestions() -> SuggestionSet {
    FALLBACK_SUGGESTIONS.map(String::from)
}

/// First `max_chars` characters of `text`, cut on a character boundary.
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Reads a numbered list of exactly three questions. Anything else, including
/// fewer items or blank items, is rejected.
pub fn parse_suggestions(reply: &str) -> Option<SuggestionSet> {
    let parsed: Vec<String> = reply
        .lines()
        .map(str::trim)
        .filter(|line| LIST_PREFIXES.iter().any(|prefix| line.starts_with(prefix)))
        .take(3)
        .map(|line| match line.split_once('.') {
            Some((_, rest)) => rest.trim().to_string(),
            None => line.to_string(),
        })
        .collect();

    if parsed.iter().any(String::is_empty) {
        return None;
    }
    parsed.try_into().ok()
}

async fn request_suggestions(
    service: &dyn CompletionService,
    text: &str,
    max_reply_tokens: u32,
) -> Result<String, CompletionError> {
    if !service.has_credential() {
        return Err(CompletionError::MissingCredential);
    }
    service
        .complete(CompletionRequest {
            system_message: SYSTEM_PROMPT.to_string(),
            user_message: format!(
                "Financial report text:\n{}",
                char_prefix(text, SUGGESTION_PREFIX_CHARS)
            ),
            max_reply_tokens,
        })
        .await
}

/// Proposes three questions about `text`. Never fails: every problem ends in
/// the fallback triple.
pub async fn suggest(
    service: &dyn CompletionService,
    text: &str,
    max_reply_tokens: u32,
) -> SuggestionSet {
    match request_suggestions(service, text, max_reply_tokens).await {
        Ok(reply) => parse_suggestions(&reply).unwrap_or_else(|| {
            tracing::warn!("Model reply did not hold 3 numbered questions; using defaults");
            tracing::debug!("Unparsed suggestion reply: {}", reply);
            fallback_suggestions()
        }),
        Err(CompletionError::MissingCredential) => {
            tracing::warn!("No API key configured; using default suggestions");
            fallback_suggestions()
        }
        Err(e) => {
            tracing::warn!("Suggestion request failed: {}; using defaults", e);
            fallback_suggestions()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion_client::tests::ScriptedCompletion;

    #[test]
    fn numbered_list_is_parsed() {
        assert_eq!(
            parse_suggestions("1. A\n2. B\n3. C"),
            Some(["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn chatter_around_the_list_is_ignored() {
        let reply = "Here are some questions:\n\n  1. What drove Q3 margin?\n2.   How large is debt?\n3. Is capex rising?\nHope this helps.";
        let parsed = parse_suggestions(reply).unwrap();
        assert_eq!(parsed[0], "What drove Q3 margin?");
        assert_eq!(parsed[1], "How large is debt?");
        assert_eq!(parsed[2], "Is capex rising?");
    }

    #[test]
    fn only_the_first_dot_is_stripped() {
        let parsed = parse_suggestions("1. Is EPS 1.25 or 1.30?\n2. B.\n3. C").unwrap();
        assert_eq!(parsed[0], "Is EPS 1.25 or 1.30?");
        assert_eq!(parsed[1], "B.");
    }

    #[test]
    fn extra_items_are_cut_to_three() {
        let parsed = parse_suggestions("1. A\n2. B\n3. C\n3. D").unwrap();
        assert_eq!(parsed[2], "C");
    }

    #[test]
    fn two_items_are_rejected() {
        assert_eq!(parse_suggestions("1. A\n2. B"), None);
    }

    #[test]
    fn blank_item_is_rejected() {
        assert_eq!(parse_suggestions("1. A\n2.\n3. C"), None);
    }

    #[test]
    fn unnumbered_lines_do_not_count() {
        assert_eq!(parse_suggestions("- A\n- B\n- C\n4. D"), None);
    }

    #[test]
    fn prefix_respects_char_boundaries() {
        assert_eq!(char_prefix("€€€", 2), "€€");
        assert_eq!(char_prefix("short", 2000), "short");
    }

    #[tokio::test]
    async fn model_list_is_returned() {
        let service = ScriptedCompletion::replying("1. A\n2. B\n3. C");
        let suggestions = suggest(&service, "Revenue grew 12%.", 300).await;
        assert_eq!(suggestions, ["A", "B", "C"].map(String::from));

        let request = service.last_request().unwrap();
        assert_eq!(request.max_reply_tokens, 300);
        assert_eq!(request.user_message, "Financial report text:\nRevenue grew 12%.");
        assert!(request.system_message.contains("exactly 3"));
    }

    #[tokio::test]
    async fn only_a_prefix_of_the_text_is_sent() {
        let service = ScriptedCompletion::replying("1. A\n2. B\n3. C");
        let text = "x".repeat(SUGGESTION_PREFIX_CHARS + 500);
        suggest(&service, &text, 300).await;
        let request = service.last_request().unwrap();
        let sent = request.user_message.trim_start_matches("Financial report text:\n");
        assert_eq!(sent.chars().count(), SUGGESTION_PREFIX_CHARS);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let service = ScriptedCompletion::replying("1. A\n2. B");
        assert_eq!(suggest(&service, "text", 300).await, fallback_suggestions());
    }

    #[tokio::test]
    async fn transport_failure_falls_back() {
        let service = ScriptedCompletion::failing("bad gateway");
        assert_eq!(suggest(&service, "text", 300).await, fallback_suggestions());
    }

    #[tokio::test]
    async fn empty_text_still_yields_three() {
        let service = ScriptedCompletion::replying("");
        assert_eq!(suggest(&service, "", 300).await.len(), 3);
    }

    #[tokio::test]
    async fn missing_credential_skips_the_call() {
        let service = ScriptedCompletion::without_credential();
        assert_eq!(suggest(&service, "text", 300).await, fallback_suggestions());
        assert_eq!(service.calls(), 0);
    }
}
