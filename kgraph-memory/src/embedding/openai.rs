//! OpenAI-compatible embedding and extraction client
//!
//! Speaks the `/embeddings` and `/chat/completions` endpoints of OpenAI or
//! any compatible server (Azure excluded). Requests are single-shot; callers
//! decide how failures are treated.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::extraction::{parse_extraction, Extraction, Extractor, EXTRACTION_PROMPT};
use super::EmbeddingProvider;
use crate::config::{EmbeddingConfig, ExtractionConfig};
use crate::error::{GraphError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You are a knowledge extraction assistant. Extract entities and relationships from text and return valid JSON only.";

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    dimension: usize,
    llm_model: String,
}

/// HTTP client with connect and request timeouts
fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| GraphError::embedding(format!("Failed to build HTTP client: {}", e)))
}

impl OpenAiClient {
    pub fn new(embedding: &EmbeddingConfig, extraction: &ExtractionConfig) -> Result<Self> {
        let api_key = embedding
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                GraphError::embedding(
                    "OpenAI API key not configured. Set OPENAI_API_KEY environment variable.",
                )
            })?;

        Ok(Self {
            client: http_client()?,
            base_url: embedding.base_url.trim_end_matches('/').to_string(),
            api_key,
            embedding_model: embedding.model.clone(),
            dimension: embedding.dimension,
            llm_model: extraction.llm_model.clone(),
        })
    }

    /// Reasoning models reject a `temperature` parameter
    fn is_reasoning_model(model: &str) -> bool {
        model.starts_with("gpt-5") || model.starts_with("o1") || model.starts_with("o3")
    }

    fn embedding_body(&self, text: &str) -> Value {
        json!({
            "model": self.embedding_model,
            "input": text.trim(),
        })
    }

    fn extraction_body(&self, text: &str) -> Value {
        let mut body = json!({
            "model": self.llm_model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": EXTRACTION_PROMPT.replace("{text}", text)},
            ],
            "response_format": {"type": "json_object"},
        });
        if !Self::is_reasoning_model(&self.llm_model) {
            body["temperature"] = json!(0.0);
        }
        body
    }

    async fn post(&self, path: &str, body: &Value) -> std::result::Result<Value, String> {
        let url = format!("{}/{}", self.base_url, path);
        log::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("API error {} from {}: {}", status.as_u16(), url, truncate(&text, 500));
            return Err(format!("API error {}: {}", status.as_u16(), truncate(&text, 200)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("Invalid response body: {}", e))
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `data[0].embedding` of an embeddings response
fn parse_embedding(response: &Value) -> Option<Vec<f32>> {
    response
        .get("data")?
        .get(0)?
        .get("embedding")?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// `choices[0].message.content` of a chat-completion response
fn parse_chat_content(response: &Value) -> Option<&str> {
    response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .post("embeddings", &self.embedding_body(text))
            .await
            .map_err(GraphError::embedding)?;

        let vector = parse_embedding(&response)
            .ok_or_else(|| GraphError::embedding("Response has no embedding vector"))?;
        log::debug!(
            "Generated embedding (text length: {}, model: {})",
            text.len(),
            self.embedding_model
        );
        Ok(vector)
    }
}

#[async_trait]
impl Extractor for OpenAiClient {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        let response = self
            .post("chat/completions", &self.extraction_body(text))
            .await
            .map_err(GraphError::extraction)?;

        let content = parse_chat_content(&response).unwrap_or_default();
        parse_extraction(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(llm_model: &str) -> OpenAiClient {
        let embedding = EmbeddingConfig {
            api_key: Some("sk-test".into()),
            base_url: "http://localhost:9/v1/".into(),
            ..EmbeddingConfig::default()
        };
        let extraction = ExtractionConfig {
            llm_model: llm_model.into(),
        };
        OpenAiClient::new(&embedding, &extraction).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let err = OpenAiClient::new(&EmbeddingConfig::default(), &ExtractionConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.error_type(), "EmbeddingError");
    }

    #[test]
    fn test_http_client_builds_with_timeouts() {
        tokio_test::assert_ok!(http_client());
        let client = client("gpt-5-nano");
        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.dimension, EmbeddingConfig::default().dimension);
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(client("gpt-5-nano").base_url, "http://localhost:9/v1");
    }

    #[test]
    fn test_temperature_only_for_standard_models() {
        let body = client("gpt-5-nano").extraction_body("Ann uses Auth");
        assert!(body.get("temperature").is_none());
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .ends_with("Ann uses Auth\n"));

        let body = client("o3-mini").extraction_body("x");
        assert!(body.get("temperature").is_none());

        let body = client("gpt-4.1").extraction_body("x");
        assert_eq!(body["temperature"], json!(0.0));
    }

    #[test]
    fn test_parse_responses() {
        let response = json!({"data": [{"embedding": [0.5, -1.0]}]});
        assert_eq!(parse_embedding(&response), Some(vec![0.5, -1.0]));
        assert_eq!(parse_embedding(&json!({"data": []})), None);

        let response = json!({"choices": [{"message": {"content": "{}"}}]});
        assert_eq!(parse_chat_content(&response), Some("{}"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_transport_failure_is_extraction_error() {
        let err = client("gpt-5-nano").extract("text").await.unwrap_err();
        assert_eq!(err.error_type(), "ExtractionError");
    }
}
