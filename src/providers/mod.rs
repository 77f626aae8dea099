//! Text-generation providers used by the generative forecasting strategy.
//!
//! The forecasting engine only sees the [`TextGenerator`] trait; it never
//! knows which HTTP API sits behind it.

mod open_ai;
pub mod retry;
#[cfg(test)]
pub(crate) mod test_utils;

use std::time::Duration;

use async_trait::async_trait;
pub use open_ai::OpenAiTextGenerator;

/// A prompt for a chat-style text-generation model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPrompt {
    /// Instructions describing the required output shape
    pub system: String,
    /// The data the model reasons over
    pub user: String,
}

/// Black-box text generation: prompt in, raw text out.
///
/// Implementations do not validate the returned text; callers parse it
/// defensively.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("generator API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("generator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator returned no content")]
    EmptyResponse,
}
