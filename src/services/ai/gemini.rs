use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::LlmProvider;

const GEMINI_API: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }]
        });

        let resp = self
            .client
            .post(format!("{GEMINI_API}/{}:generateContent", self.model))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .context("failed to call Gemini API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Gemini response")?;

        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, data);
        }

        extract_text(&data)
    }
}

fn extract_text(data: &serde_json::Value) -> anyhow::Result<String> {
    data["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            let preview: String = data.to_string().chars().take(500).collect();
            anyhow::anyhow!("Gemini response missing candidate text: {preview}")
        })
}
