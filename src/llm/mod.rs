//! LLM module - the oracle channel
//!
//! Provides the completion client abstraction with Ollama as the primary
//! backend, and the gateway that rate-limits and retries every call.

pub mod clock;
pub mod gateway;
pub mod ollama;
pub mod traits;

pub use clock::{Clock, ManualClock, TokioClock};
pub use gateway::{OracleGateway, RateLimitState, RetryPolicy};
pub use ollama::OllamaClient;
pub use traits::{Attachment, CompletionClient, CompletionRequest};
