//! Channel traits for the relay's messaging gateway.

use async_trait::async_trait;
use relay_core::{InboundEvent, OutboundReply, Relay};

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Messaging gateway the relay talks through.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Log in and verify credentials.
    async fn init(&mut self) -> ChannelResult<()>;

    /// Post a plain-text reply. Returns the platform's message ID.
    async fn send(&self, reply: OutboundReply) -> ChannelResult<String>;

    /// Receive messages until shutdown, handing each one to `callback`.
    ///
    /// The callback must not block; spawn a task for slow work.
    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static;

    /// Check if the channel is healthy.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Stop listening.
    async fn shutdown(&self) -> ChannelResult<()>;
}

/// Turns an inbound event into an optional reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> Option<OutboundReply>;
}

#[async_trait]
impl MessageHandler for Relay {
    async fn handle(&self, event: InboundEvent) -> Option<OutboundReply> {
        Relay::handle(self, event).await
    }
}
