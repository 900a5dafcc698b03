//! Ollama client implementation
//!
//! Async HTTP client for the Ollama generate API, used as the default oracle.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::core::{Config, PilotError, Result};
use crate::llm::traits::{CompletionClient, CompletionRequest};

/// Ollama API client bound to one model
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

/// Ollama generate request
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama generate response (non-streaming)
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Model information
#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ollama.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.ollama_url(),
            model: config.models.oracle.clone(),
        })
    }

    /// Create a client with custom base URL and model
    pub fn with_base_url(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    /// The model every request is sent to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Log a truncated payload at debug level
    fn debug_payload(label: &str, content: &str) {
        let shown: String = content.chars().take(500).collect();
        let truncated = shown.len() < content.len();
        debug!(label, truncated, payload = %shown, "ollama payload");
    }

    /// Map a transport error, keeping the status for classification
    fn transport_error(&self, e: reqwest::Error) -> PilotError {
        if e.is_connect() {
            PilotError::oracle(
                None,
                format!("Cannot connect to Ollama at {}. Is it running?", self.base_url),
            )
        } else if e.is_timeout() {
            PilotError::oracle(None, format!("Ollama request timed out: {}", e))
        } else {
            PilotError::oracle(e.status().map(|s| s.as_u16()), e.to_string())
        }
    }

    /// List models available in the local Ollama instance
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(PilotError::oracle(
                Some(response.status().as_u16()),
                "Failed to list models",
            ));
        }

        let models_response: ModelsResponse = response.json().await?;
        Ok(models_response.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let options = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            })
        } else {
            None
        };

        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            images: request
                .attachments
                .iter()
                .map(|a| a.data_base64.as_str())
                .collect(),
            options,
            stream: false,
        };

        Self::debug_payload("request", &request.prompt);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 && error_text.contains("not found") {
                return Err(PilotError::ModelNotFound(self.model.clone()));
            }

            return Err(PilotError::oracle(
                Some(status.as_u16()),
                format!("Ollama API error ({}): {}", status, error_text),
            ));
        }

        let response_text = response.text().await.map_err(|e| self.transport_error(e))?;
        Self::debug_payload("response", &response_text);

        let generated: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            PilotError::oracle(None, format!("Failed to parse Ollama response: {}", e))
        })?;

        if let (Some(prompt), Some(completion)) = (generated.prompt_eval_count, generated.eval_count)
        {
            debug!(
                model = %self.model,
                prompt_tokens = prompt,
                completion_tokens = completion,
                "ollama usage"
            );
        }

        Ok(generated.response)
    }

    async fn is_model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| {
            m == &self.model || m.split(':').next() == self.model.split(':').next()
        }))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
