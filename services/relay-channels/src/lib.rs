//! Relay Channels - Matrix adapter and process wiring for the
//! Matrix/Ollama relay.
//!
//! ## Architecture
//!
//! ```text
//! Matrix /sync → MatrixChannel::listen → spawn_dispatch → Relay
//!                                                          ↓
//! Matrix room  ←────────── MatrixChannel::send ←──── OutboundReply
//! ```
//!
//! Each inbound event is handled on its own task so a slow model call
//! never stalls the sync loop.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod matrix;
pub mod traits;

pub use matrix::{Login, MatrixChannel};
pub use traits::{Channel, ChannelError, ChannelResult, MessageHandler};

use anyhow::Context;
use relay_common::Config;
use relay_core::{InboundEvent, LlmClient, OllamaClient, Relay};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle one event on a background task and post the reply, if any.
pub fn spawn_dispatch<C>(
    handler: Arc<dyn MessageHandler>,
    channel: Arc<C>,
    event: InboundEvent,
) -> JoinHandle<()>
where
    C: Channel + 'static,
{
    tokio::spawn(async move {
        let Some(reply) = handler.handle(event).await else {
            return;
        };
        let room_id = reply.room_id.clone();
        match channel.send(reply).await {
            Ok(event_id) => {
                tracing::debug!(room = %room_id, event_id = %event_id, "Reply sent");
            }
            Err(e) => {
                tracing::warn!(channel = channel.name(), room = %room_id, error = %e, "Failed to send reply");
            }
        }
    })
}

/// Log in, then relay messages until the channel stops or Ctrl-C arrives.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(OllamaClient::from_config(&config.llm));
    tracing::info!(
        provider = llm.name(),
        model = %config.llm.model,
        endpoint = %config.ollama_url(),
        "Inference client ready"
    );

    let handler: Arc<dyn MessageHandler> = Arc::new(Relay::from_config(config, llm));

    let mut channel = MatrixChannel::from_config(&config.bot);
    channel
        .init()
        .await
        .with_context(|| format!("Failed to log in to {}", config.homeserver()))?;
    let channel = Arc::new(channel);

    tracing::info!(allowed_user = %config.bot.user_id, "All systems nominal");

    let dispatch_channel = Arc::clone(&channel);
    let callback = move |event: InboundEvent| {
        spawn_dispatch(Arc::clone(&handler), Arc::clone(&dispatch_channel), event);
    };

    tokio::select! {
        result = channel.listen(callback) => {
            result.context("Matrix listener stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
            channel.shutdown().await?;
        }
    }

    Ok(())
}
