//! The generative oracle seam.
//!
//! The oracle is opaque, latent, and occasionally returns malformed
//! output; every `generate` result must therefore go through
//! [`crate::parser`] before use. The trait exists so tests can substitute
//! a scripted fake (see [`crate::testing::MockOracle`]).

use async_trait::async_trait;
use thiserror::Error;

use gemini::{Gemini, Message, Request};

/// Low temperature for judgment calls; consistency checks should be
/// deterministic, not creative.
const JUDGE_TEMPERATURE: f32 = 0.1;

/// Maximum tokens for a single oracle response.
const ORACLE_MAX_TOKENS: usize = 2048;

/// Errors from oracle calls.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned an empty response")]
    Empty,
}

/// The external generative capability: free-form text and embeddings.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Generate free-form text given instructions and context.
    async fn generate(&self, instructions: &str, context: &str) -> Result<String, OracleError>;

    /// Embed text into the corpus's vector space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError>;
}

/// Live oracle backed by the Gemini API.
pub struct GeminiOracle {
    client: Gemini,
    temperature: f32,
    max_tokens: usize,
}

impl GeminiOracle {
    /// Wrap an existing Gemini client.
    pub fn new(client: Gemini) -> Self {
        Self {
            client,
            temperature: JUDGE_TEMPERATURE,
            max_tokens: ORACLE_MAX_TOKENS,
        }
    }

    /// Create from the GEMINI_API_KEY environment variable.
    pub fn from_env() -> Result<Self, gemini::Error> {
        Ok(Self::new(Gemini::from_env()?))
    }

    /// Override the generation temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the response token budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, instructions: &str, context: &str) -> Result<String, OracleError> {
        let request = Request::new(vec![Message::user(context)])
            .with_system(instructions)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self
            .client
            .generate(request)
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        if response.text.trim().is_empty() {
            return Err(OracleError::Empty);
        }

        Ok(response.text)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        self.client
            .embed(text)
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))
    }
}
