//! Configuration validation.
//!
//! Checks that required values are present and within valid ranges
//! before the relay logs in anywhere.

use thiserror::Error;

use crate::config::{BotConfig, Config, LlmConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.bot.validate() {
            errors.push(e);
        }
        if let Err(e) = self.llm.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply env overrides and validate.
    pub fn load_and_validate(explicit: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_with_env(explicit)?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

fn validate_http_url(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.into(),
        });
    }
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: e.to_string(),
        }),
    }
}

/// A Matrix user ID has the shape `@localpart:server`.
fn is_matrix_user_id(value: &str) -> bool {
    value
        .strip_prefix('@')
        .and_then(|rest| rest.split_once(':'))
        .is_some_and(|(local, server)| !local.is_empty() && !server.is_empty())
}

impl Validate for BotConfig {
    fn validate(&self) -> ValidationResult<()> {
        validate_http_url("bot.homeserver", &self.homeserver)?;

        if !is_matrix_user_id(&self.user_id) {
            return Err(ValidationError::InvalidValue {
                field: "bot.user_id".into(),
                reason: format!("'{}' is not a Matrix user ID", self.user_id),
            });
        }

        let has_token = self.access_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        if !has_token && !has_password {
            return Err(ValidationError::MissingField {
                field: "bot.password (or bot.access_token)".into(),
            });
        }
        if !has_token && self.username.is_empty() {
            return Err(ValidationError::MissingField {
                field: "bot.username".into(),
            });
        }

        Ok(())
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "llm.model".into(),
            });
        }

        validate_http_url("llm.endpoint", &self.endpoint)?;

        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "llm.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ValidationError::InvalidValue {
                    field: "llm.temperature".into(),
                    reason: "must be between 0.0 and 2.0".into(),
                });
            }
        }

        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(ValidationError::InvalidValue {
                    field: "llm.top_p".into(),
                    reason: "must be between 0.0 and 1.0".into(),
                });
            }
        }

        if self.top_k == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "llm.top_k".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
