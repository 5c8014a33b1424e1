//! Per-user conversation state.
//!
//! One [`ConversationSession`] exists per Matrix user for the lifetime of
//! the process. Sessions live behind their own async mutex so a chat
//! exchange can hold the lock across the Ollama round-trip without
//! blocking other users.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Speaker role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standing instruction, only ever sent, never stored
    System,
    /// Message typed by the user
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// Wire name of the role.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Mutable chat state for one user.
///
/// History only ever holds `user` and `assistant` turns; the system prompt
/// is kept separately and injected when a request is built.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    history: Vec<Turn>,
    system_prompt: String,
}

impl ConversationSession {
    /// Create an empty session starting with the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Turns in chronological order.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    /// Drop every stored turn. The system prompt is kept.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn record_user(&mut self, content: impl Into<String>) {
        self.history.push(Turn::user(content));
    }

    pub fn record_assistant(&mut self, content: impl Into<String>) {
        self.history.push(Turn::assistant(content));
    }

    /// Render the history as `[role] content`, one turn per line.
    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|turn| format!("[{}] {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Shared handle to a session. Lock it for the whole of any compound
/// read-modify-write.
pub type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Process-wide map from Matrix user ID to conversation session.
///
/// Sessions are created lazily on first contact and never evicted.
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    default_prompt: String,
}

impl SessionStore {
    /// Create an empty store whose new sessions start with `default_prompt`.
    pub fn new(default_prompt: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            default_prompt: default_prompt.into(),
        }
    }

    /// Return the session for `identity`, creating it if this is the first
    /// contact. Concurrent callers for the same identity get the same handle.
    pub fn get_or_create(&self, identity: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(identity) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .sessions
            .entry(identity.to_string())
            .or_insert_with(|| {
                tracing::info!(user = %identity, "Created conversation session");
                Arc::new(Mutex::new(ConversationSession::new(
                    self.default_prompt.clone(),
                )))
            });
        Arc::clone(entry.value())
    }

    /// Prompt assigned to newly created sessions.
    pub fn default_prompt(&self) -> &str {
        &self.default_prompt
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
