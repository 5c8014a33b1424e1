//! Inbound event boundary.
//!
//! The relay only answers one configured user, and only in two-party
//! rooms. Everything else is dropped here and never reaches a session.

use std::sync::Arc;

use relay_common::Config;

use crate::command::CommandRouter;
use crate::llm::{LlmClient, SamplingOptions};
use crate::session::SessionStore;

/// Text message delivered by the messaging gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Matrix user ID of the sender
    pub sender: String,
    /// Room the message was posted in
    pub room_id: String,
    /// Joined members of the room, the bot included
    pub participant_count: usize,
    pub body: String,
}

/// Plain-text reply for the gateway to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub room_id: String,
    pub text: String,
}

/// Why an inbound event was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("sender {0} is not the allowed user")]
    UnauthorizedSender(String),

    #[error("room has {0} participants, not a direct chat")]
    NotDirect(usize),

    #[error("empty message body")]
    EmptyBody,
}

impl Rejection {
    /// Wrong sender or wrong kind of room.
    pub const fn is_authorization_mismatch(&self) -> bool {
        matches!(self, Self::UnauthorizedSender(_) | Self::NotDirect(_))
    }
}

/// Filters inbound events and routes admitted ones into sessions.
pub struct Relay {
    allowed_user: String,
    sessions: Arc<SessionStore>,
    router: CommandRouter,
}

impl Relay {
    pub fn new(
        allowed_user: impl Into<String>,
        sessions: Arc<SessionStore>,
        router: CommandRouter,
    ) -> Self {
        Self {
            allowed_user: allowed_user.into(),
            sessions,
            router,
        }
    }

    /// Build a relay with a fresh session store from configuration.
    pub fn from_config(config: &Config, llm: Arc<dyn LlmClient>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.llm.default_prompt.clone()));
        let router = CommandRouter::new(llm, SamplingOptions::from_config(&config.llm));
        Self::new(config.bot.user_id.clone(), sessions, router)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn is_allowed_sender(&self, sender: &str) -> bool {
        sender == self.allowed_user
    }

    /// Decide whether an event may reach the command router.
    pub fn admit(&self, event: &InboundEvent) -> Result<(), Rejection> {
        if !self.is_allowed_sender(&event.sender) {
            return Err(Rejection::UnauthorizedSender(event.sender.clone()));
        }
        if event.body.trim().is_empty() {
            return Err(Rejection::EmptyBody);
        }
        if event.participant_count != 2 {
            return Err(Rejection::NotDirect(event.participant_count));
        }
        Ok(())
    }

    /// Handle one inbound event. Returns `None` when the event is dropped.
    pub async fn handle(&self, event: InboundEvent) -> Option<OutboundReply> {
        if let Err(rejection) = self.admit(&event) {
            if rejection.is_authorization_mismatch() {
                tracing::info!(
                    sender = %event.sender,
                    room = %event.room_id,
                    reason = %rejection,
                    "Ignoring message"
                );
            } else {
                tracing::debug!(sender = %event.sender, reason = %rejection, "Ignoring message");
            }
            return None;
        }

        tracing::debug!(sender = %event.sender, room = %event.room_id, body = %event.body, "Processing message");

        let session = self.sessions.get_or_create(&event.sender);
        let text = self.router.dispatch(&session, &event.body).await;

        Some(OutboundReply {
            room_id: event.room_id,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::InferenceError;
    use crate::session::Turn;
    use async_trait::async_trait;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        async fn query(
            &self,
            history: &[Turn],
            _system_prompt: &str,
            _options: &SamplingOptions,
        ) -> Result<String, InferenceError> {
            Ok(history.last().map(|t| t.content.clone()).unwrap_or_default())
        }
    }

    const ALLOWED: &str = "@alice:example.org";

    fn relay() -> Relay {
        let sessions = Arc::new(SessionStore::new("prompt"));
        let router = CommandRouter::new(Arc::new(EchoLlm), SamplingOptions::default());
        Relay::new(ALLOWED, sessions, router)
    }

    fn event(sender: &str, participants: usize, body: &str) -> InboundEvent {
        InboundEvent {
            sender: sender.into(),
            room_id: "!dm:example.org".into(),
            participant_count: participants,
            body: body.into(),
        }
    }

    #[test]
    fn admits_allowed_sender_in_direct_room() {
        assert_eq!(relay().admit(&event(ALLOWED, 2, "hi")), Ok(()));
    }

    #[test]
    fn rejects_other_senders() {
        let err = relay()
            .admit(&event("@mallory:example.org", 2, "hi"))
            .unwrap_err();
        assert!(err.is_authorization_mismatch());
        assert_eq!(
            err,
            Rejection::UnauthorizedSender("@mallory:example.org".into())
        );
    }

    #[test]
    fn sender_match_is_exact() {
        assert!(relay().admit(&event("@Alice:example.org", 2, "hi")).is_err());
    }

    #[test]
    fn rejects_group_rooms() {
        assert_eq!(
            relay().admit(&event(ALLOWED, 3, "hi")),
            Err(Rejection::NotDirect(3))
        );
        assert_eq!(
            relay().admit(&event(ALLOWED, 1, "hi")),
            Err(Rejection::NotDirect(1))
        );
    }

    #[test]
    fn rejects_empty_body() {
        let err = relay().admit(&event(ALLOWED, 2, "  ")).unwrap_err();
        assert_eq!(err, Rejection::EmptyBody);
        assert!(!err.is_authorization_mismatch());
    }

    #[tokio::test]
    async fn dropped_events_create_no_session() {
        let relay = relay();
        assert!(relay.handle(event("@bob:example.org", 2, "hi")).await.is_none());
        assert!(relay.handle(event(ALLOWED, 5, "hi")).await.is_none());
        assert!(relay.sessions().is_empty());
    }

    #[tokio::test]
    async fn admitted_event_is_answered_in_its_room() {
        let relay = relay();
        let reply = relay.handle(event(ALLOWED, 2, "ping")).await.unwrap();
        assert_eq!(
            reply,
            OutboundReply {
                room_id: "!dm:example.org".into(),
                text: "ping".into(),
            }
        );
        assert_eq!(relay.sessions().len(), 1);
    }
}
