//! Relay Core - conversation sessions and model orchestration for the
//! Matrix/Ollama relay.
//!
//! ## Architecture
//!
//! ```text
//! Matrix DM → Relay (filter) → CommandRouter ─┬─ /command → session
//!                                             └─ chat → LlmClient → Ollama
//!                                                          ↓
//! Matrix DM ←──────────── OutboundReply ←──── reply appended to session
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod command;
pub mod llm;
pub mod relay;
pub mod session;

pub use command::{classify, Command, CommandRouter, Route, APOLOGY_REPLY, HELP_TEXT};
pub use llm::{build_messages, InferenceError, LlmClient, OllamaClient, SamplingOptions};
pub use relay::{InboundEvent, OutboundReply, Rejection, Relay};
pub use session::{ConversationSession, Role, SessionHandle, SessionStore, Turn};
