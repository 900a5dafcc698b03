//! Completion client trait for abstracting inference backends
//!
//! The oracle is any service that turns a text prompt (plus optional images)
//! into text. Failures carry an inspectable status and message so the gateway
//! can tell quota exhaustion apart from other errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;

/// An image sent along with a prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type, e.g. image/png
    pub media_type: String,
    /// Base64-encoded payload
    pub data_base64: String,
}

/// One completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Prompt text
    pub prompt: String,
    /// Optional image attachments
    pub attachments: Vec<Attachment>,
    /// Temperature for sampling (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a plain text request
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the sampling temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Add image attachments
    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Trait for inference backends
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Complete a prompt into text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Check if the configured model is available
    async fn is_model_available(&self) -> Result<bool> {
        Ok(true)
    }

    /// Get the provider name
    fn name(&self) -> &str;
}
