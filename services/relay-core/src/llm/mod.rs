//! Chat-completion clients.
//!
//! A client receives the stored history and the session's system prompt,
//! prepends the prompt as a synthetic `system` turn, and returns the
//! model's reply text.

mod ollama;

pub use ollama::OllamaClient;

use async_trait::async_trait;
use rand::Rng;
use relay_common::LlmConfig;

use crate::session::Turn;

/// Seeds are drawn uniformly from `0..SEED_RANGE`.
pub const SEED_RANGE: u64 = 100_000_000;

/// Error from a single inference request.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Inference endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed inference response: {0}")]
    Decode(String),
}

impl InferenceError {
    /// True when the endpoint could not be reached at all.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Sampling parameters sent with every request.
///
/// Unset fields are left to the model's defaults. A `None` seed means a
/// fresh one is drawn per request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingOptions {
    pub temperature: Option<f64>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
}

impl SamplingOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            seed: None,
        }
    }

    /// Pin the seed instead of drawing one per request.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Seed to use for the next request.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(random_seed)
    }
}

/// Draw a request seed.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..SEED_RANGE)
}

/// Assemble the outbound message list: system prompt first, then history.
pub fn build_messages(history: &[Turn], system_prompt: &str) -> Vec<Turn> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Turn::system(system_prompt));
    messages.extend(history.iter().cloned());
    messages
}

/// Chat-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Send one non-streaming chat request and return the reply content.
    async fn query(
        &self,
        history: &[Turn],
        system_prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, InferenceError>;
}
