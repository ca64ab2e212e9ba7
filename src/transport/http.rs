//! REST and websocket implementation of the session API

use super::{FrameStream, MessageApi, SessionDirectory, SessionRoute, TransportError};
use crate::config::{ClientConfig, TokenProvider};
use crate::model::{Message, Page, Rating, Session, SessionCreate, Tool};
use async_trait::async_trait;
use futures::{future, StreamExt, TryFutureExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Session API backed by the chatbot HTTP service.
///
/// No client-side timeout is configured; failures are whatever the
/// connection reports.
pub struct HttpSessionApi {
    client: reqwest::Client,
    config: ClientConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpSessionApi {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.config.url(path));
        match self.tokens.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and return the body of a successful response
    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<String, TransportError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                TransportError::network(format!("Connection failed: {e}"))
            } else {
                TransportError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let err = classify_error(status, &body);
            tracing::warn!(status = status.as_u16(), error = %err, "Request rejected");
            return Err(err);
        }
        Ok(body)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let body = self.execute(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| TransportError::decode(format!("Failed to parse response: {e} - body: {body}")))
    }
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> TransportError {
    // FastAPI puts the reason under "detail"
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    let message = match status.as_u16() {
        401 | 403 => format!("Authentication failed: {detail}"),
        404 => format!("Not found: {detail}"),
        400 | 422 => format!("Invalid request: {detail}"),
        500..=599 => format!("Server error: {detail}"),
        _ => format!("HTTP {status}: {detail}"),
    };
    TransportError::server(status.as_u16(), message)
}

#[async_trait]
impl SessionDirectory for HttpSessionApi {
    async fn create_session(&self, payload: &SessionCreate) -> Result<Session, TransportError> {
        tracing::debug!(tool_id = %payload.tool_id, "Creating session");
        self.json(self.request(reqwest::Method::POST, "/session").json(payload))
            .await
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, TransportError> {
        self.json(self.request(reqwest::Method::GET, &format!("/session/{session_id}")))
            .await
    }

    async fn list_sessions(&self, page: u32, size: u32) -> Result<Page<Session>, TransportError> {
        let builder = self
            .request(reqwest::Method::GET, "/session")
            .query(&[("page", page), ("size", size)]);
        self.json(builder).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError> {
        self.execute(self.request(reqwest::Method::DELETE, &format!("/session/{session_id}")))
            .await
            .map(drop)
    }

    async fn get_tool(&self, tool_id: &str) -> Result<Tool, TransportError> {
        self.json(self.request(reqwest::Method::GET, &format!("/tool/{tool_id}")))
            .await
    }
}

#[async_trait]
impl MessageApi for HttpSessionApi {
    async fn fetch_messages(
        &self,
        route: &SessionRoute,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError> {
        let builder = self
            .request(reqwest::Method::GET, &route.base_path())
            .query(&[("offset", offset), ("limit", limit)]);
        self.json(builder).await
    }

    async fn send_message(
        &self,
        route: &SessionRoute,
        body: &str,
    ) -> Result<Message, TransportError> {
        let builder = self
            .request(reqwest::Method::POST, &route.base_path())
            .json(&json!({ "message": body }));
        self.json(builder).await
    }

    async fn rate(
        &self,
        route: &SessionRoute,
        message_id: &str,
        rating: Rating,
    ) -> Result<Message, TransportError> {
        let path = format!("{}/message/{message_id}/rate", route.base_path());
        let builder = self
            .request(reqwest::Method::POST, &path)
            .json(&json!({ "rating": rating.value() }));
        self.json(builder).await
    }

    async fn regenerate(
        &self,
        route: &SessionRoute,
        message_id: &str,
    ) -> Result<(), TransportError> {
        let path = format!("{}/message/{message_id}/regenerate", route.base_path());
        self.execute(self.request(reqwest::Method::POST, &path))
            .await
            .map(drop)
    }

    fn push_frames(&self, route: &SessionRoute) -> Result<FrameStream, TransportError> {
        let url = self.config.push_url(&format!("{}/ws", route.base_path()));
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::invalid_argument(format!("Invalid push URL {url}: {e}")))?;
        if let Some(token) = self.tokens.token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::invalid_argument(format!("Invalid token: {e}")))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let session_id = route.session_id.clone();
        let connect = async move {
            let (socket, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| TransportError::network(format!("Push connection failed: {e}")))?;
            tracing::debug!(%session_id, "Push socket connected");
            Ok::<_, TransportError>(socket)
        };

        let frames = connect
            .map_ok(|socket| {
                socket
                    .take_while(|frame| future::ready(!matches!(frame, Ok(WsMessage::Close(_)))))
                    .filter_map(|frame| {
                        future::ready(match frame {
                            Ok(WsMessage::Text(text)) => Some(Ok(text)),
                            // Control and binary frames carry nothing for us
                            Ok(_) => None,
                            Err(e) => Some(Err(TransportError::network(format!(
                                "Push socket error: {e}"
                            )))),
                        })
                    })
            })
            .try_flatten_stream();
        Ok(frames.boxed())
    }
}
