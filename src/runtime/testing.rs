//! Mock implementations for testing
//!
//! These mocks enable controller tests without real I/O.

use super::SessionController;
use super::SessionHandle;
use crate::model::{Message, Page, Rating, Session, SessionCreate, Tool};
use crate::state_machine::{Notification, SessionContext};
use crate::transport::{
    FrameStream, MessageApi, SessionDirectory, SessionRoute, TransportError,
};
use crate::view::ConversationView;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Fixtures
// ============================================================================

pub fn message(id: &str, is_system: bool, body: &str) -> Message {
    Message {
        id: Some(id.to_string()),
        session_id: Some("s1".to_string()),
        is_system,
        is_error: false,
        is_hidden: false,
        body: body.to_string(),
        created_at: None,
        created_by: None,
        sources: vec![],
        rating: None,
    }
}

pub fn session(id: &str, tool_id: &str) -> Session {
    Session {
        id: id.to_string(),
        title: "hello".to_string(),
        tool_id: tool_id.to_string(),
        created_at: None,
        created_by: None,
    }
}

pub fn tool(id: &str, name: &str) -> Tool {
    Tool {
        id: id.to_string(),
        name: name.to_string(),
        title: "Ask the docs".to_string(),
        description: String::new(),
        is_system: false,
        model_id: None,
        configuration: serde_json::Value::Null,
    }
}

// ============================================================================
// Mock Session API
// ============================================================================

/// Calls recorded by [`MockSessionApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSession { title: String, tool_id: String },
    GetSession(String),
    ListSessions { page: u32, size: u32 },
    DeleteSession(String),
    GetTool(String),
    FetchMessages { session_id: String, offset: u32, limit: u32 },
    SendMessage { session_id: String, body: String },
    Rate { message_id: String, rating: Rating },
    Regenerate { message_id: String },
    OpenPush { session_id: String },
}

type FrameSender = mpsc::UnboundedSender<Result<String, TransportError>>;

/// Session API returning queued responses. An empty queue answers with a
/// network error, except history which defaults to an empty page.
#[derive(Default)]
pub struct MockSessionApi {
    sessions: Mutex<HashMap<String, Session>>,
    tools: Mutex<HashMap<String, Tool>>,
    created: Mutex<VecDeque<Result<Session, TransportError>>>,
    history: Mutex<VecDeque<Result<Vec<Message>, TransportError>>>,
    sent: Mutex<VecDeque<Result<Message, TransportError>>>,
    rated: Mutex<VecDeque<Result<Message, TransportError>>>,
    regenerated: Mutex<VecDeque<Result<(), TransportError>>>,
    creation_gate: Mutex<Option<Arc<Notify>>>,
    push_senders: Mutex<Vec<FrameSender>>,
    /// Record of all calls made
    pub calls: Mutex<Vec<Call>>,
}

impl MockSessionApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, session: Session) -> Self {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
        self
    }

    pub fn with_tool(self, tool: Tool) -> Self {
        self.tools.lock().unwrap().insert(tool.id.clone(), tool);
        self
    }

    pub fn queue_created(&self, result: Result<Session, TransportError>) {
        self.created.lock().unwrap().push_back(result);
    }

    pub fn queue_history(&self, result: Result<Vec<Message>, TransportError>) {
        self.history.lock().unwrap().push_back(result);
    }

    pub fn queue_sent(&self, result: Result<Message, TransportError>) {
        self.sent.lock().unwrap().push_back(result);
    }

    pub fn queue_rated(&self, result: Result<Message, TransportError>) {
        self.rated.lock().unwrap().push_back(result);
    }

    pub fn queue_regenerated(&self, result: Result<(), TransportError>) {
        self.regenerated.lock().unwrap().push_back(result);
    }

    /// Make `create_session` wait until the returned gate is notified
    pub fn hold_creation(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.creation_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn recorded_calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    /// Deliver a raw text frame on the most recently opened push channel
    pub fn push_text(&self, text: &str) -> bool {
        self.push_senders
            .lock()
            .unwrap()
            .last()
            .is_some_and(|tx| tx.send(Ok(text.to_string())).is_ok())
    }

    pub fn push_message(&self, message: &Message) -> bool {
        self.push_text(&serde_json::to_string(message).unwrap())
    }

    pub fn push_error(&self, error: TransportError) -> bool {
        self.push_senders
            .lock()
            .unwrap()
            .last()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Whether the client side of every push channel has been released
    pub fn push_released(&self) -> bool {
        self.push_senders
            .lock()
            .unwrap()
            .iter()
            .all(mpsc::UnboundedSender::is_closed)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn pop<T>(queue: &Mutex<VecDeque<Result<T, TransportError>>>) -> Result<T, TransportError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No mock response queued")))
    }
}

#[async_trait]
impl SessionDirectory for MockSessionApi {
    async fn create_session(&self, payload: &SessionCreate) -> Result<Session, TransportError> {
        self.record(Call::CreateSession {
            title: payload.title.clone(),
            tool_id: payload.tool_id.clone(),
        });
        let gate = self.creation_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Self::pop(&self.created)
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, TransportError> {
        self.record(Call::GetSession(session_id.to_string()));
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| TransportError::server(404, "Not found: Session not found"))
    }

    async fn list_sessions(&self, page: u32, size: u32) -> Result<Page<Session>, TransportError> {
        self.record(Call::ListSessions { page, size });
        let items: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
        Ok(Page {
            total: items.len() as u64,
            items,
            page,
            size,
            pages: Some(1),
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError> {
        self.record(Call::DeleteSession(session_id.to_string()));
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn get_tool(&self, tool_id: &str) -> Result<Tool, TransportError> {
        self.record(Call::GetTool(tool_id.to_string()));
        self.tools
            .lock()
            .unwrap()
            .get(tool_id)
            .cloned()
            .ok_or_else(|| TransportError::server(404, "Not found: Tool not found"))
    }
}

#[async_trait]
impl MessageApi for MockSessionApi {
    async fn fetch_messages(
        &self,
        route: &SessionRoute,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>, TransportError> {
        self.record(Call::FetchMessages {
            session_id: route.session_id.clone(),
            offset,
            limit,
        });
        self.history
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn send_message(
        &self,
        route: &SessionRoute,
        body: &str,
    ) -> Result<Message, TransportError> {
        self.record(Call::SendMessage {
            session_id: route.session_id.clone(),
            body: body.to_string(),
        });
        Self::pop(&self.sent)
    }

    async fn rate(
        &self,
        _route: &SessionRoute,
        message_id: &str,
        rating: Rating,
    ) -> Result<Message, TransportError> {
        self.record(Call::Rate {
            message_id: message_id.to_string(),
            rating,
        });
        Self::pop(&self.rated)
    }

    async fn regenerate(
        &self,
        _route: &SessionRoute,
        message_id: &str,
    ) -> Result<(), TransportError> {
        self.record(Call::Regenerate {
            message_id: message_id.to_string(),
        });
        Self::pop(&self.regenerated)
    }

    fn push_frames(&self, route: &SessionRoute) -> Result<FrameStream, TransportError> {
        self.record(Call::OpenPush {
            session_id: route.session_id.clone(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_senders.lock().unwrap().push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// ============================================================================
// Test Session
// ============================================================================

/// A running controller wired to a [`MockSessionApi`]
pub struct TestSession {
    pub api: Arc<MockSessionApi>,
    pub handle: SessionHandle,
    pub views: watch::Receiver<ConversationView>,
    pub notifications: broadcast::Receiver<Notification>,
    task: tokio::task::JoinHandle<()>,
}

impl TestSession {
    pub fn start(api: MockSessionApi, session_id: Option<&str>) -> Self {
        let api = Arc::new(api);
        let context = SessionContext::new("tool-1", "question_answering");
        let controller =
            SessionController::new(context, Arc::clone(&api), session_id.map(str::to_string));
        let handle = controller.handle();
        let views = handle.views();
        let notifications = handle.notifications();
        let task = tokio::spawn(controller.run());

        Self {
            api,
            handle,
            views,
            notifications,
            task,
        }
    }

    /// Wait until the published view satisfies `predicate`
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ConversationView) -> bool,
    ) -> ConversationView {
        tokio::time::timeout(WAIT, self.views.wait_for(predicate))
            .await
            .expect("timed out waiting for view")
            .expect("controller stopped")
            .clone()
    }

    pub async fn next_notification(&mut self) -> Notification {
        tokio::time::timeout(WAIT, self.notifications.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("notification channel closed")
    }

    pub fn view(&self) -> ConversationView {
        self.views.borrow().clone()
    }

    /// Unmount and wait for the controller loop to finish
    pub async fn stop(self) -> Arc<MockSessionApi> {
        self.handle.unmount();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("controller did not stop")
            .expect("controller panicked");
        self.api
    }
}

pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{open_page, PageTarget, Unmounted};
    use crate::state_machine::{NotificationKind, Operation, Phase};
    use crate::tools::{ToolBinding, ToolRegistry};

    fn ids(view: &ConversationView) -> Vec<&str> {
        view.messages
            .iter()
            .filter_map(|m| m.id.as_deref())
            .collect()
    }

    async fn live_session(history: Vec<Message>) -> TestSession {
        let api = MockSessionApi::new();
        api.queue_history(Ok(history));
        let mut page = TestSession::start(api, Some("s1"));
        page.wait_for(|v| v.phase == Phase::Live).await;
        page
    }

    #[tokio::test]
    async fn test_resume_send_and_reply() {
        let mut page = live_session(vec![message("m1", false, "hi")]).await;
        page.api.queue_sent(Ok(message("m2", false, "hello")));

        page.handle.send("hello").unwrap();
        let view = page.wait_for(|v| v.messages.len() == 2).await;
        assert!(view.waiting);
        assert_eq!(ids(&view), vec!["m1", "m2"]);

        assert!(page.api.push_message(&message("m3", true, "hi there")));
        let view = page.wait_for(|v| v.messages.len() == 3).await;
        assert!(!view.waiting);
        assert_eq!(ids(&view), vec!["m1", "m2", "m3"]);

        let api = page.stop().await;
        let calls = api.recorded_calls();
        let fetch = calls
            .iter()
            .position(|c| matches!(c, Call::FetchMessages { .. }))
            .unwrap();
        let open = calls
            .iter()
            .position(|c| matches!(c, Call::OpenPush { .. }))
            .unwrap();
        assert!(fetch < open, "history must load before the channel opens");
        assert!(calls.contains(&Call::FetchMessages {
            session_id: "s1".into(),
            offset: 0,
            limit: 1000
        }));
    }

    #[tokio::test]
    async fn test_first_send_creates_session() {
        let api = MockSessionApi::new();
        api.queue_created(Ok(session("s2", "tool-1")));
        let mut page = TestSession::start(api, None);
        assert_eq!(page.view().phase, Phase::Idle);

        page.handle.send("first").unwrap();
        let view = page.wait_for(|v| v.phase == Phase::AwaitingReply).await;
        assert_eq!(view.session_id.as_deref(), Some("s2"));
        assert!(view.messages.is_empty(), "creation appends nothing locally");
        assert!(view.waiting);

        let calls = page.api.recorded_calls();
        assert_eq!(
            calls[0],
            Call::CreateSession {
                title: "first".into(),
                tool_id: "tool-1".into()
            }
        );
        assert!(calls.contains(&Call::OpenPush {
            session_id: "s2".into()
        }));
        assert_eq!(page.api.count(|c| matches!(c, Call::SendMessage { .. })), 0);

        page.api.push_message(&message("m2", true, "welcome"));
        let view = page.wait_for(|v| !v.waiting).await;
        assert_eq!(ids(&view), vec!["m2"]);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_send_during_creation_is_rejected() {
        let api = MockSessionApi::new();
        let gate = api.hold_creation();
        api.queue_created(Ok(session("s2", "tool-1")));
        let mut page = TestSession::start(api, None);

        page.handle.send("first").unwrap();
        let view = page.wait_for(|v| v.phase == Phase::CreatingSession).await;
        assert_eq!(view.busy, 1);

        page.handle.send("second").unwrap();
        let notification = page.next_notification().await;
        assert_eq!(notification.kind, NotificationKind::Rejected);
        assert_eq!(notification.operation, Operation::Send);

        gate.notify_one();
        page.wait_for(|v| v.phase == Phase::AwaitingReply).await;
        assert_eq!(
            page.api.count(|c| matches!(c, Call::CreateSession { .. })),
            1
        );
        page.stop().await;
    }

    #[tokio::test]
    async fn test_creation_failure_returns_to_idle() {
        let api = MockSessionApi::new();
        api.queue_created(Err(TransportError::server(500, "Server error: boom")));
        let mut page = TestSession::start(api, None);

        page.handle.send("first").unwrap();
        let notification = page.next_notification().await;
        assert_eq!(notification.operation, Operation::CreateSession);
        let view = page.wait_for(|v| v.phase == Phase::Idle && v.busy == 0).await;
        assert!(view.session_id.is_none());
        page.stop().await;
    }

    #[tokio::test]
    async fn test_send_failure_keeps_log() {
        let mut page = live_session(vec![message("m1", false, "hi")]).await;
        page.api.queue_sent(Err(TransportError::server(502, "Server error: down")));

        page.handle.send("hello").unwrap();
        let notification = page.next_notification().await;
        assert_eq!(notification.kind, NotificationKind::ServerError);
        assert_eq!(notification.operation, Operation::Send);

        let view = page.wait_for(|v| v.busy == 0).await;
        assert_eq!(ids(&view), vec!["m1"]);
        assert!(!view.waiting);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_rate_failure_leaves_rating() {
        let mut page =
            live_session(vec![message("m1", false, "hi"), message("m3", true, "hi there")]).await;
        page.api
            .queue_rated(Err(TransportError::server(500, "Server error: boom")));

        page.handle.rate("m3", Rating::Dislike).unwrap();
        let notification = page.next_notification().await;
        assert_eq!(notification.operation, Operation::Rate);
        assert_eq!(notification.kind, NotificationKind::ServerError);

        let view = page.wait_for(|v| v.busy == 0).await;
        assert_eq!(view.messages[1].rating, None);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_rate_twice_keeps_latest() {
        let mut page = live_session(vec![message("m3", true, "hi there")]).await;
        page.api.queue_rated(Ok(message("m3", true, "hi there")));
        page.api.queue_rated(Ok(message("m3", true, "hi there")));

        page.handle.rate("m3", Rating::Like).unwrap();
        page.wait_for(|v| v.messages[0].rating == Some(Rating::Like))
            .await;
        page.handle.rate("m3", Rating::Dislike).unwrap();
        let view = page
            .wait_for(|v| v.messages[0].rating == Some(Rating::Dislike))
            .await;
        assert_eq!(view.messages[0].segments.len(), 1);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_regenerate_replaces_last_reply() {
        let mut page =
            live_session(vec![message("m1", false, "hi"), message("m2", true, "old")]).await;
        page.api.queue_regenerated(Ok(()));

        page.handle.regenerate("m2").unwrap();
        let view = page.wait_for(|v| v.messages.len() == 1).await;
        assert!(view.waiting);

        page.api.push_message(&message("m3", true, "new"));
        let view = page.wait_for(|v| v.messages.len() == 2).await;
        assert!(!view.waiting);
        assert_eq!(ids(&view), vec!["m1", "m3"]);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_double_regenerate_issues_one_call() {
        let mut page =
            live_session(vec![message("m1", false, "hi"), message("m2", true, "old")]).await;
        page.api.queue_regenerated(Ok(()));
        page.api.queue_regenerated(Ok(()));

        page.handle.regenerate("m2").unwrap();
        page.handle.regenerate("m2").unwrap();
        let notification = page.next_notification().await;
        assert_eq!(notification.kind, NotificationKind::Rejected);
        assert_eq!(notification.operation, Operation::Regenerate);

        page.wait_for(|v| v.messages.len() == 1 && v.busy == 0).await;
        page.api.push_message(&message("m3", true, "new"));
        let view = page.wait_for(|v| !v.waiting).await;
        assert_eq!(ids(&view), vec!["m1", "m3"]);
        assert_eq!(
            page.api.count(|c| matches!(c, Call::Regenerate { .. })),
            1
        );
        page.stop().await;
    }

    #[tokio::test]
    async fn test_regenerate_of_user_message_rejected() {
        let mut page =
            live_session(vec![message("m2", true, "answer"), message("m3", false, "more")]).await;

        page.handle.regenerate("m3").unwrap();
        let notification = page.next_notification().await;
        assert_eq!(notification.kind, NotificationKind::Rejected);
        assert_eq!(notification.operation, Operation::Regenerate);
        assert_eq!(page.view().messages.len(), 2);
        assert_eq!(
            page.api.count(|c| matches!(c, Call::Regenerate { .. })),
            0
        );
        page.stop().await;
    }

    #[tokio::test]
    async fn test_history_failure_still_goes_live() {
        let api = MockSessionApi::new();
        api.queue_history(Err(TransportError::server(500, "Server error: boom")));
        let mut page = TestSession::start(api, Some("s1"));

        let notification = page.next_notification().await;
        assert_eq!(notification.operation, Operation::LoadHistory);
        let view = page.wait_for(|v| v.phase == Phase::Live).await;
        assert!(view.messages.is_empty());
        assert_eq!(page.api.count(|c| matches!(c, Call::OpenPush { .. })), 1);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_keepalive_and_garbage_ignored() {
        let mut page = live_session(vec![message("m1", false, "hi")]).await;

        assert!(page.api.push_text("ping"));
        assert!(page.api.push_text("{broken"));
        page.api.push_message(&message("m2", true, "answer"));

        let view = page.wait_for(|v| v.messages.len() == 2).await;
        assert_eq!(ids(&view), vec!["m1", "m2"]);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_push_error_clears_waiting_and_closes() {
        let mut page = live_session(vec![message("m1", false, "hi")]).await;
        page.api.queue_sent(Ok(message("m2", false, "hello")));
        page.handle.send("hello").unwrap();
        page.wait_for(|v| v.waiting).await;

        page.api.push_error(TransportError::network("Push socket error: reset"));
        let notification = page.next_notification().await;
        assert_eq!(notification.operation, Operation::PushChannel);
        let view = page.wait_for(|v| !v.waiting).await;
        assert_eq!(view.phase, Phase::Live);

        let api = Arc::clone(&page.api);
        assert!(eventually(|| api.push_released()).await);
        page.stop().await;
    }

    #[tokio::test]
    async fn test_unmount_stops_delivery() {
        let page = live_session(vec![message("m1", false, "hi")]).await;
        let handle = page.handle.clone();
        let views = page.views.clone();

        let api = page.stop().await;
        assert!(eventually(|| api.push_released()).await);
        assert!(!api.push_message(&message("m2", true, "late")));
        assert_eq!(views.borrow().messages.len(), 1);

        assert_eq!(handle.send("anyone there?"), Err(Unmounted));
        handle.unmount();
    }

    #[tokio::test]
    async fn test_dropping_handles_unmounts() {
        let api = MockSessionApi::new();
        api.queue_history(Ok(vec![]));
        let mut page = TestSession::start(api, Some("s1"));
        page.wait_for(|v| v.phase == Phase::Live).await;

        let TestSession { api, handle, task, .. } = page;
        drop(handle);
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(eventually(|| api.push_released()).await);
    }

    #[tokio::test]
    async fn test_open_existing_page() {
        let api = MockSessionApi::new()
            .with_session(session("s1", "tool-1"))
            .with_tool(tool("tool-1", "question_answering"));
        let registry = ToolRegistry::default().with_history_limit(20);

        let page = open_page(
            &api,
            &registry,
            PageTarget::Existing {
                session_id: "s1".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(page.session_id.as_deref(), Some("s1"));
        let ToolBinding::Conversation(context) = page.binding else {
            panic!("expected conversation binding");
        };
        assert_eq!(context.history_limit, 20);
        assert_eq!(
            api.recorded_calls(),
            vec![Call::GetSession("s1".into()), Call::GetTool("tool-1".into())]
        );
    }

    #[tokio::test]
    async fn test_open_new_page_with_unknown_tool() {
        let api = MockSessionApi::new().with_tool(tool("tool-9", "image_captioning"));

        let page = open_page(
            &api,
            &ToolRegistry::default(),
            PageTarget::New {
                tool_id: "tool-9".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(page.session_id, None);
        assert_eq!(
            page.binding,
            ToolBinding::Unsupported {
                name: "image_captioning".into()
            }
        );
        assert_eq!(api.recorded_calls(), vec![Call::GetTool("tool-9".into())]);
    }

    #[tokio::test]
    async fn test_open_missing_session() {
        let api = MockSessionApi::new();
        let err = open_page(
            &api,
            &ToolRegistry::default(),
            PageTarget::Existing {
                session_id: "gone".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, Some(404));
    }
}
