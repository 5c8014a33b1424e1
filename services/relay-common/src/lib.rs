//! Relay Common - configuration, logging and validation shared by the
//! Matrix/Ollama relay crates.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{BotConfig, Config, LlmConfig, ObservabilityConfig};
pub use validation::{Validate, ValidationError, ValidationResult};
