use crate::config::ServiceCatalog;
use crate::models::ClassificationResult;
use crate::services::ai::{prompts, LlmProvider};

/// Asks the provider to classify a prospect reply. Every failure, whether
/// transport, empty output, or unparseable JSON, comes back as `None`.
pub async fn classify(
    llm: &dyn LlmProvider,
    reply: &str,
    first_name: &str,
    history: &str,
    catalog: &ServiceCatalog,
) -> Option<ClassificationResult> {
    let prompt = prompts::classification(reply, first_name, catalog, history);
    let raw = complete(llm, &prompt).await?;

    let parsed = parse_classification(&raw);
    if parsed.is_none() {
        let preview: String = raw.chars().take(200).collect();
        tracing::warn!(raw = %preview, "classifier output was not valid classification JSON");
    }
    parsed
}

/// Body for the qualified follow-up, or `None` if generation failed.
pub async fn contextual_follow_up(
    llm: &dyn LlmProvider,
    result: &ClassificationResult,
    first_name: &str,
    sender_name: &str,
    catalog: &ServiceCatalog,
    history: &str,
) -> Option<String> {
    let prompt = prompts::contextual_follow_up(result, first_name, sender_name, catalog, history);
    complete(llm, &prompt).await
}

/// Free-text completion with provider errors and blank output collapsed to
/// `None`.
pub async fn complete(llm: &dyn LlmProvider, prompt: &str) -> Option<String> {
    match llm.complete(prompt).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            tracing::warn!("text completion returned empty output");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "text completion failed");
            None
        }
    }
}

pub fn parse_classification(raw: &str) -> Option<ClassificationResult> {
    if let Ok(result) = serde_json::from_str::<ClassificationResult>(raw.trim()) {
        return Some(result);
    }

    // One retry on the contents of a fenced code block.
    let fenced = fenced_block(raw)?;
    serde_json::from_str::<ClassificationResult>(fenced).ok()
}

fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")? + 3;
    let rest = &raw[start..];
    // Skip a language tag such as `json` on the opening fence line.
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let rest = &rest[body_start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}
