//! Reasoning ports and the `edgequake-llm` adapter behind them.
//!
//! The structurer and the extraction tiers never talk to a provider directly.
//! They hold an `Arc<dyn TextReasoner>` / `Arc<dyn VisionReasoner>`, so tests
//! inject canned answers and the CLI injects [`LlmReasoner`].
//!
//! Calls are single-shot: no retry, no timeout beyond the provider's own.
//! A failed call is a [`ReasoningError`] the caller logs and moves past.

use crate::error::{EsgError, ReasoningError};
use crate::pipeline::encode::{image_data, ImageDetail};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A model that answers a text prompt.
#[async_trait]
pub trait TextReasoner: Send + Sync {
    async fn reason_text(&self, system: &str, prompt: &str) -> Result<String, ReasoningError>;
}

/// A model that answers a prompt about one PNG image.
#[async_trait]
pub trait VisionReasoner: Send + Sync {
    async fn reason_vision(
        &self,
        prompt: &str,
        png: &[u8],
        detail: ImageDetail,
    ) -> Result<String, ReasoningError>;
}

/// [`TextReasoner`] + [`VisionReasoner`] over any `edgequake-llm` provider.
#[derive(Clone)]
pub struct LlmReasoner {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmReasoner {
    /// Extraction wants deterministic answers: temperature 0, short outputs.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n.max(16);
        self
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, ReasoningError> {
        let start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| ReasoningError::CallFailed(e.to_string()))?;
        debug!(
            "Reasoning call: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        if response.content.trim().is_empty() {
            return Err(ReasoningError::EmptyResponse);
        }
        Ok(response.content)
    }
}

#[async_trait]
impl TextReasoner for LlmReasoner {
    async fn reason_text(&self, system: &str, prompt: &str) -> Result<String, ReasoningError> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(prompt, Vec::new()),
        ];
        self.chat(messages).await
    }
}

#[async_trait]
impl VisionReasoner for LlmReasoner {
    async fn reason_vision(
        &self,
        prompt: &str,
        png: &[u8],
        detail: ImageDetail,
    ) -> Result<String, ReasoningError> {
        if png.is_empty() {
            return Err(ReasoningError::Encoding("empty image".into()));
        }
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![image_data(png, detail)],
        )];
        self.chat(messages).await
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, EsgError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        EsgError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `provider_name` (+ `model`, default `gpt-4.1-nano`)
/// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 3. OpenAI when `OPENAI_API_KEY` is set
/// 4. `ProviderFactory::from_env()` auto-detection
pub fn resolve_provider(
    provider_name: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, EsgError> {
    if let Some(name) = provider_name {
        return create_provider(name, model.unwrap_or("gpt-4.1-nano"));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model.unwrap_or("gpt-4.1-nano"));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| EsgError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

// ── Response parsing ─────────────────────────────────────────────────────

/// Remove a surrounding ```` ```json ```` fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    if !text.starts_with("```") {
        return text;
    }
    let body = match text.find('\n') {
        Some(nl) => &text[nl + 1..],
        None => text.trim_start_matches('`'),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice of the first balanced `{ … }` object in `text`, ignoring braces in strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model answer as a JSON object.
///
/// Tries the fence-stripped text first, then the first balanced object in the
/// raw answer. Returns `None` when neither decodes to an object.
pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(stripped) {
        return Some(v);
    }
    let candidate = first_json_object(text)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// Read a JSON value as a number, accepting strings with thousands separators.
///
/// Zero is treated as "not found", the way models answer for missing values.
pub fn json_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (n.is_finite() && n != 0.0).then_some(n)
}

/// Read a JSON value as a calendar year.
pub fn json_year(value: &Value) -> Option<i32> {
    let n = json_number(value)?;
    let y = n.round() as i32;
    (1900..=2100).contains(&y).then_some(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"scope1\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"scope1\": 1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn extract_json_from_prose() {
        let raw = "Here you go: {\"s1_2024\": \"1,234\", \"note\": \"a } brace\"} hope it helps";
        let v = extract_json(raw).unwrap();
        assert_eq!(json_number(&v["s1_2024"]), Some(1234.0));
    }

    #[test]
    fn extract_json_rejects_garbage() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("{ broken").is_none());
    }

    #[test]
    fn json_number_variants() {
        assert_eq!(json_number(&json!(12.5)), Some(12.5));
        assert_eq!(json_number(&json!("137,450")), Some(137450.0));
        assert_eq!(json_number(&json!(null)), None);
        assert_eq!(json_number(&json!(0)), None);
        assert_eq!(json_number(&json!("n/a")), None);
    }

    #[test]
    fn json_year_range() {
        assert_eq!(json_year(&json!(2019)), Some(2019));
        assert_eq!(json_year(&json!("2018")), Some(2018));
        assert_eq!(json_year(&json!(12)), None);
    }
}
