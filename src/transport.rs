//! Session transport client
//!
//! Network-facing primitives for a session: the session directory (create,
//! fetch, list, delete), the per-session message endpoints, and the push
//! channel over which assistant replies arrive.

mod error;
pub mod http;
pub mod push;

pub use error::{TransportError, TransportErrorKind};
pub use http::HttpSessionApi;
pub use push::{FrameStream, PushChannel, PushEvent, PushPayload};

use crate::model::{Message, Page, Rating, Session, SessionCreate, Tool};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Addressing of one session's tool endpoints: `/session/{id}/tool/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoute {
    pub session_id: String,
    pub tool_name: String,
}

impl SessionRoute {
    pub fn new(session_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Path relative to the API base URL
    pub fn base_path(&self) -> String {
        format!("/session/{}/tool/{}", self.session_id, self.tool_name)
    }
}

/// Session and tool lookups that are not tied to a single session channel
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn create_session(&self, payload: &SessionCreate) -> Result<Session, TransportError>;

    async fn get_session(&self, session_id: &str) -> Result<Session, TransportError>;

    async fn list_sessions(&self, page: u32, size: u32) -> Result<Page<Session>, TransportError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError>;

    async fn get_tool(&self, tool_id: &str) -> Result<Tool, TransportError>;
}

/// Request/response and push endpoints of one session
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn fetch_messages(
        &self,
        route: &SessionRoute,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError>;

    /// Returns the user message as stored by the server
    async fn send_message(&self, route: &SessionRoute, body: &str)
        -> Result<Message, TransportError>;

    async fn rate(
        &self,
        route: &SessionRoute,
        message_id: &str,
        rating: Rating,
    ) -> Result<Message, TransportError>;

    /// The replacement reply arrives on the push channel, not here
    async fn regenerate(&self, route: &SessionRoute, message_id: &str)
        -> Result<(), TransportError>;

    /// Raw text frames of the push channel. Connecting happens lazily when
    /// the stream is first polled.
    fn push_frames(&self, route: &SessionRoute) -> Result<FrameStream, TransportError>;
}

/// Combined API trait for convenience
pub trait SessionApi: SessionDirectory + MessageApi {}
impl<T: SessionDirectory + MessageApi> SessionApi for T {}

/// Transport client for one session.
///
/// Request methods return `'static` futures so they can be spawned without
/// borrowing the client. The client is the sole owner of the push channel
/// handle and allows at most one open channel at a time.
pub struct SessionTransport<A: SessionApi + 'static> {
    api: Arc<A>,
    route: SessionRoute,
    push: Option<PushChannel>,
}

impl<A: SessionApi + 'static> SessionTransport<A> {
    pub fn new(api: Arc<A>, route: SessionRoute) -> Self {
        Self {
            api,
            route,
            push: None,
        }
    }

    pub fn fetch_messages(
        &self,
        offset: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Message>, TransportError>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let route = self.route.clone();
        async move {
            if limit == 0 {
                return Err(TransportError::invalid_argument("limit must be positive"));
            }
            api.fetch_messages(&route, offset, limit).await
        }
    }

    pub fn send_message(
        &self,
        body: String,
    ) -> impl Future<Output = Result<Message, TransportError>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let route = self.route.clone();
        async move { api.send_message(&route, &body).await }
    }

    pub fn rate(
        &self,
        message_id: String,
        rating: Rating,
    ) -> impl Future<Output = Result<Message, TransportError>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let route = self.route.clone();
        async move { api.rate(&route, &message_id, rating).await }
    }

    pub fn regenerate(
        &self,
        message_id: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let route = self.route.clone();
        async move { api.regenerate(&route, &message_id).await }
    }

    /// Open the push channel and start delivering into `sink`.
    ///
    /// Returns the generation tag carried by every event of this channel.
    pub fn open_push_channel(
        &mut self,
        sink: mpsc::UnboundedSender<PushEvent>,
    ) -> Result<u64, TransportError> {
        if self.push.as_ref().is_some_and(|channel| !channel.is_closed()) {
            tracing::warn!(session_id = %self.route.session_id, "Push channel already open");
            return Err(TransportError::invalid_argument("push channel already open"));
        }

        let frames = self.api.push_frames(&self.route)?;
        let mut channel = PushChannel::new(self.route.session_id.clone(), frames);
        channel.subscribe(sink)?;
        let generation = channel.generation();
        self.push = Some(channel);

        tracing::debug!(session_id = %self.route.session_id, generation, "Push channel opened");
        Ok(generation)
    }

    /// Close the push channel. Safe to call when none is open.
    pub fn close_push_channel(&mut self) {
        if let Some(mut channel) = self.push.take() {
            channel.close();
            tracing::debug!(session_id = %self.route.session_id, "Push channel closed");
        }
    }

    /// Whether `event` belongs to the currently open channel
    pub fn accepts(&self, event: &PushEvent) -> bool {
        self.push
            .as_ref()
            .is_some_and(|channel| channel.accepts(event))
    }
}
