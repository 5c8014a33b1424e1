//! Matrix channel for the relay.
//!
//! Connects to a Matrix homeserver using the Client-Server API: password
//! (or token) login, long-poll `/sync`, invite auto-join, joined-member
//! lookups for DM detection and plain `m.text` sends.

use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use relay_common::BotConfig;
use relay_core::{InboundEvent, OutboundReply};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Filter for the first sync: we only need the `since` token, not backlog.
const INITIAL_SYNC_FILTER: &str = r#"{"room":{"timeline":{"limit":1}}}"#;
const SYNC_TIMEOUT_MS: &str = "30000";
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// How the bot authenticates.
#[derive(Debug, Clone)]
pub enum Login {
    /// `m.login.password` with a user identifier
    Password {
        username: String,
        password: String,
        device_name: String,
    },
    /// Pre-issued access token
    AccessToken(String),
}

/// Matrix channel using the Client-Server API.
pub struct MatrixChannel {
    homeserver: String,
    login: Login,
    access_token: Option<String>,
    user_id: Option<String>,
    allowed_sender: Option<String>,
    client: Client,
    connected: Arc<RwLock<bool>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: String,
    access_token: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct JoinedMembersResponse {
    #[serde(default)]
    joined: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: Rooms,
}

#[derive(Debug, Deserialize, Default)]
struct Rooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    invite: HashMap<String, InvitedRoom>,
}

#[derive(Debug, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Debug, Deserialize, Default)]
struct Timeline {
    #[serde(default)]
    events: Vec<TimelineEvent>,
}

#[derive(Debug, Deserialize)]
struct TimelineEvent {
    #[serde(rename = "type")]
    event_type: String,
    sender: String,
    #[serde(default)]
    content: EventContent,
}

#[derive(Debug, Deserialize, Default)]
struct EventContent {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    msgtype: Option<String>,
    #[serde(default)]
    membership: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvitedRoom {
    #[serde(default)]
    invite_state: InviteState,
}

#[derive(Debug, Deserialize, Default)]
struct InviteState {
    #[serde(default)]
    events: Vec<StrippedStateEvent>,
}

#[derive(Debug, Deserialize)]
struct StrippedStateEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    state_key: Option<String>,
    sender: String,
    #[serde(default)]
    content: EventContent,
}

impl InvitedRoom {
    /// The user who invited `user_id`, if this room holds such an invite.
    fn inviter_of(&self, user_id: &str) -> Option<&str> {
        self.invite_state
            .events
            .iter()
            .find(|ev| {
                ev.event_type == "m.room.member"
                    && ev.state_key.as_deref() == Some(user_id)
                    && ev.content.membership.as_deref() == Some("invite")
            })
            .map(|ev| ev.sender.as_str())
    }
}

fn encode_path(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

impl MatrixChannel {
    /// Create a new Matrix channel. Call [`Channel::init`] before use.
    pub fn new(homeserver: String, login: Login) -> Self {
        let homeserver = homeserver.trim_end_matches('/').to_string();
        Self {
            homeserver,
            login,
            access_token: None,
            user_id: None,
            allowed_sender: None,
            client: Client::builder()
                .timeout(Duration::from_secs(90))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            connected: Arc::new(RwLock::new(false)),
        }
    }

    /// Create from the `[bot]` config section. A configured access token
    /// takes precedence over the password.
    pub fn from_config(config: &BotConfig) -> Self {
        let login = match (&config.access_token, &config.password) {
            (Some(token), _) if !token.is_empty() => Login::AccessToken(token.clone()),
            (_, password) => Login::Password {
                username: config.username.clone(),
                password: password.clone().unwrap_or_default(),
                device_name: config.device_name.clone(),
            },
        };
        Self::new(config.homeserver.clone(), login).with_allowed_sender(&config.user_id)
    }

    /// Only deliver messages from `user_id`. Other senders are skipped
    /// before the room member lookup.
    pub fn with_allowed_sender(mut self, user_id: &str) -> Self {
        self.allowed_sender = Some(user_id.to_string());
        self
    }

    fn is_sender_allowed(&self, sender: &str) -> bool {
        self.allowed_sender
            .as_deref()
            .map_or(true, |allowed| allowed == sender)
    }

    /// The bot's own user ID, known after `init`.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/_matrix/client/v3{}", self.homeserver, path)
    }

    fn authed(&self, builder: RequestBuilder) -> ChannelResult<RequestBuilder> {
        let token = self.access_token.as_deref().ok_or(ChannelError::NotReady)?;
        Ok(builder.bearer_auth(token))
    }

    async fn error_text(resp: Response) -> String {
        resp.text().await.unwrap_or_default()
    }

    async fn password_login(
        &self,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> ChannelResult<LoginResponse> {
        let body = serde_json::json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": username},
            "password": password,
            "initial_device_display_name": device_name,
        });

        let resp = self
            .client
            .post(self.url("/login"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("login failed: {e}")))?;

        if !resp.status().is_success() {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::Auth(format!("Matrix login failed: {err}")));
        }

        resp.json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse login: {e}")))
    }

    async fn whoami(&self) -> ChannelResult<String> {
        let resp = self
            .authed(self.client.get(self.url("/account/whoami")))?
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("whoami failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::Auth(format!("Matrix whoami failed: {err}")));
        }
        if !status.is_success() {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::Connection(format!(
                "Matrix whoami failed ({status}): {err}"
            )));
        }

        let who: WhoAmIResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse whoami: {e}")))?;

        Ok(who.user_id)
    }

    /// Number of users currently joined to `room_id`, the bot included.
    pub async fn joined_member_count(&self, room_id: &str) -> ChannelResult<usize> {
        let path = format!("/rooms/{}/joined_members", encode_path(room_id));
        let resp = self
            .authed(self.client.get(self.url(&path)))?
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("joined_members failed: {e}")))?;

        if !resp.status().is_success() {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::Internal(format!(
                "Matrix joined_members failed: {err}"
            )));
        }

        let members: JoinedMembersResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse members: {e}")))?;

        Ok(members.joined.len())
    }

    /// Join a room the bot was invited to.
    pub async fn join_room(&self, room_id: &str) -> ChannelResult<()> {
        let path = format!("/join/{}", encode_path(room_id));
        let resp = self
            .authed(self.client.post(self.url(&path)))?
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("join failed: {e}")))?;

        if !resp.status().is_success() {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::Internal(format!("Matrix join failed: {err}")));
        }
        Ok(())
    }

    async fn sync(&self, since: Option<&str>) -> ChannelResult<SyncResponse> {
        let mut builder = self
            .authed(self.client.get(self.url("/sync")))?
            .query(&[("timeout", SYNC_TIMEOUT_MS)]);
        builder = match since {
            Some(since) => builder.query(&[("since", since)]),
            None => builder.query(&[("filter", INITIAL_SYNC_FILTER)]),
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("sync failed: {e}")))?;

        if !resp.status().is_success() {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::Connection(format!("Matrix sync failed: {err}")));
        }

        resp.json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse sync: {e}")))
    }

    /// Join invited rooms.
    async fn accept_invites(&self, sync: &SyncResponse, my_user_id: &str) {
        for (room_id, room) in &sync.rooms.invite {
            let Some(inviter) = room.inviter_of(my_user_id) else {
                continue;
            };
            match self.join_room(room_id).await {
                Ok(()) => tracing::info!(room = %room_id, inviter = %inviter, "Joined room after invite"),
                Err(e) => tracing::warn!(room = %room_id, error = %e, "Failed to join room"),
            }
        }
    }

    /// Turn the text messages of one sync batch into inbound events.
    async fn collect_messages<F>(&self, sync: &SyncResponse, my_user_id: &str, callback: &F)
    where
        F: Fn(InboundEvent) + Send + Sync,
    {
        for (room_id, room) in &sync.rooms.join {
            for event in &room.timeline.events {
                // Skip our own messages
                if event.sender == my_user_id {
                    continue;
                }

                if event.event_type != "m.room.message" {
                    continue;
                }

                if event.content.msgtype.as_deref() != Some("m.text") {
                    continue;
                }

                let Some(ref body) = event.content.body else {
                    continue;
                };

                if !self.is_sender_allowed(&event.sender) {
                    tracing::debug!(sender = %event.sender, room = %room_id, "Ignoring message from non-allowed sender");
                    continue;
                }

                tracing::info!(sender = %event.sender, room = %room_id, "Received message event");

                let participant_count = match self.joined_member_count(room_id).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(room = %room_id, error = %e, "Failed to get room members");
                        continue;
                    }
                };

                callback(InboundEvent {
                    sender: event.sender.clone(),
                    room_id: room_id.clone(),
                    participant_count,
                    body: body.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl Channel for MatrixChannel {
    fn name(&self) -> &'static str {
        "matrix"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        let user_id = match self.login.clone() {
            Login::AccessToken(token) => {
                self.access_token = Some(token);
                self.whoami().await?
            }
            Login::Password {
                username,
                password,
                device_name,
            } => {
                let login = self
                    .password_login(&username, &password, &device_name)
                    .await?;
                tracing::debug!(device_id = ?login.device_id, "Matrix login succeeded");
                self.access_token = Some(login.access_token);
                login.user_id
            }
        };

        tracing::info!(user_id = %user_id, homeserver = %self.homeserver, "Matrix channel initialized");
        self.user_id = Some(user_id);
        *self.connected.write().await = true;
        Ok(())
    }

    async fn send(&self, reply: OutboundReply) -> ChannelResult<String> {
        let txn_id = format!("relay_{}", uuid::Uuid::new_v4().simple());
        let path = format!(
            "/rooms/{}/send/m.room.message/{}",
            encode_path(&reply.room_id),
            txn_id
        );

        let body = serde_json::json!({
            "msgtype": "m.text",
            "body": reply.text
        });

        let resp = self
            .authed(self.client.put(self.url(&path)))?
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("Matrix send error: {e}")))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .json::<ErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.retry_after_ms)
                .unwrap_or(1000);
            return Err(ChannelError::RateLimited {
                retry_after_secs: retry_after_ms.div_ceil(1000),
            });
        }
        if !status.is_success() {
            let err = Self::error_text(resp).await;
            return Err(ChannelError::SendFailed(format!(
                "Matrix send failed: {err}"
            )));
        }

        let result: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;

        let event_id = result
            .get("event_id")
            .and_then(|id| id.as_str())
            .unwrap_or(&txn_id)
            .to_string();

        Ok(event_id)
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let my_user_id = self.user_id.clone().ok_or(ChannelError::NotReady)?;
        tracing::info!("Matrix channel listening...");

        // Initial sync to get the since token; backlog is not replayed.
        let initial = self.sync(None).await?;
        self.accept_invites(&initial, &my_user_id).await;
        let mut since = initial.next_batch;

        // Long-poll loop
        while *self.connected.read().await {
            let sync = match self.sync(Some(&since)).await {
                Ok(s) => s,
                Err(e) => {
                    // A revoked token never recovers; anything else is retried.
                    if let Err(ChannelError::Auth(reason)) = self.health_check().await {
                        tracing::error!(%reason, "Matrix credentials rejected, stopping listener");
                        return Err(ChannelError::Auth(reason));
                    }
                    tracing::warn!("Matrix sync error: {e}, retrying...");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            since = sync.next_batch.clone();

            self.accept_invites(&sync, &my_user_id).await;
            self.collect_messages(&sync, &my_user_id, &callback).await;
        }

        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        self.whoami().await.map(|_| ())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        *self.connected.write().await = false;
        tracing::info!("Matrix channel shutdown");
        Ok(())
    }
}
