//! Slash-command routing.
//!
//! Bodies are matched against [`COMMAND_TABLE`] in order using literal,
//! case-sensitive prefixes; the first match wins. Anything else is a chat
//! turn for the model. `/clearfoo` therefore runs `/clear`.

use std::sync::Arc;

use crate::llm::{LlmClient, SamplingOptions};
use crate::session::{ConversationSession, SessionHandle};

pub const CLEARED_REPLY: &str = "Conversation cleared.";
pub const PROMPT_SET_REPLY: &str = "System prompt set.";
pub const EMPTY_CONVERSATION_REPLY: &str = "Conversation is empty.";
pub const APOLOGY_REPLY: &str = "Sorry, something went wrong.";

pub const HELP_TEXT: &str = "Commands:\n\
/clear - Clear the conversation history\n\
/setprompt <prompt> - Set a new system prompt\n\
/viewprompt - View the current system prompt\n\
/viewconversation - View the conversation history\n\
/help - Display this help message";

/// In-band commands understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Clear,
    SetPrompt,
    ViewPrompt,
    ViewConversation,
    Help,
}

type Handler = fn(&mut ConversationSession, &str) -> String;

/// One row of the routing table.
pub struct CommandSpec {
    pub command: Command,
    pub prefix: &'static str,
    handler: Handler,
}

impl CommandSpec {
    fn matches<'a>(&self, body: &'a str) -> Option<&'a str> {
        body.strip_prefix(self.prefix)
    }
}

/// Commands in match priority order.
pub const COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        command: Command::Clear,
        prefix: "/clear",
        handler: clear,
    },
    CommandSpec {
        command: Command::SetPrompt,
        prefix: "/setprompt",
        handler: set_prompt,
    },
    CommandSpec {
        command: Command::ViewPrompt,
        prefix: "/viewprompt",
        handler: view_prompt,
    },
    CommandSpec {
        command: Command::ViewConversation,
        prefix: "/viewconversation",
        handler: view_conversation,
    },
    CommandSpec {
        command: Command::Help,
        prefix: "/help",
        handler: help,
    },
];

fn clear(session: &mut ConversationSession, _argument: &str) -> String {
    session.clear();
    CLEARED_REPLY.to_string()
}

fn set_prompt(session: &mut ConversationSession, argument: &str) -> String {
    session.set_system_prompt(argument.trim());
    PROMPT_SET_REPLY.to_string()
}

fn view_prompt(session: &mut ConversationSession, _argument: &str) -> String {
    session.system_prompt().to_string()
}

fn view_conversation(session: &mut ConversationSession, _argument: &str) -> String {
    if session.history().is_empty() {
        EMPTY_CONVERSATION_REPLY.to_string()
    } else {
        session.transcript()
    }
}

fn help(_session: &mut ConversationSession, _argument: &str) -> String {
    HELP_TEXT.to_string()
}

/// How an inbound body is handled.
pub enum Route<'a> {
    /// A table command with the text following its prefix
    Command(&'static CommandSpec, &'a str),
    /// A plain chat turn
    Chat(&'a str),
}

/// Classify a body against the command table.
pub fn classify(body: &str) -> Route<'_> {
    COMMAND_TABLE
        .iter()
        .find_map(|spec| spec.matches(body).map(|rest| Route::Command(spec, rest)))
        .unwrap_or(Route::Chat(body))
}

/// Applies commands to a session and forwards chat turns to the model.
pub struct CommandRouter {
    llm: Arc<dyn LlmClient>,
    sampling: SamplingOptions,
}

impl CommandRouter {
    pub fn new(llm: Arc<dyn LlmClient>, sampling: SamplingOptions) -> Self {
        Self { llm, sampling }
    }

    /// Handle one inbound body and return the reply text.
    ///
    /// The session lock is held for the whole call, including the model
    /// round-trip, so exchanges for one user never interleave.
    pub async fn dispatch(&self, session: &SessionHandle, body: &str) -> String {
        let mut session = session.lock().await;

        match classify(body) {
            Route::Command(spec, argument) => {
                tracing::debug!(command = ?spec.command, "Running command");
                (spec.handler)(&mut *session, argument)
            }
            Route::Chat(text) => self.chat(&mut *session, text).await,
        }
    }

    async fn chat(&self, session: &mut ConversationSession, text: &str) -> String {
        session.record_user(text);

        let result = self
            .llm
            .query(session.history(), session.system_prompt(), &self.sampling)
            .await;

        match result {
            Ok(reply) => {
                session.record_assistant(reply.clone());
                reply
            }
            Err(e) => {
                // The unanswered user turn stays in history.
                tracing::warn!(backend = self.llm.name(), error = %e, "Inference failed");
                APOLOGY_REPLY.to_string()
            }
        }
    }
}
