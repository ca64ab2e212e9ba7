//! Session lifecycle controller

use crate::model::{Rating, SessionCreate};
use crate::state_machine::{
    transition, ConvState, Effect, Event, Notification, Operation, SessionContext,
};
use crate::transport::{PushEvent, PushPayload, SessionApi, SessionRoute, SessionTransport};
use crate::view::ConversationView;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("session page is unmounted")]
pub struct Unmounted;

/// Runs one conversation: applies events to the state machine, executes the
/// resulting effects and publishes the derived view.
///
/// Network calls run as spawned tasks whose completions come back as events,
/// so the loop never waits on HTTP. Once the loop stops, late completions are
/// dropped with the channel they would have been sent on.
pub struct SessionController<A: SessionApi + 'static> {
    context: SessionContext,
    state: ConvState,
    api: Arc<A>,
    /// Exists once the session id is known
    transport: Option<SessionTransport<A>>,
    intent_tx: mpsc::UnboundedSender<Event>,
    intent_rx: mpsc::UnboundedReceiver<Event>,
    completion_tx: mpsc::UnboundedSender<Event>,
    completion_rx: mpsc::UnboundedReceiver<Event>,
    push_tx: mpsc::UnboundedSender<PushEvent>,
    push_rx: mpsc::UnboundedReceiver<PushEvent>,
    views: watch::Sender<ConversationView>,
    notifications: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
    /// Shared by every handle; the controller's copy is released when it runs
    guard: Option<Arc<DropGuard>>,
    busy: usize,
}

impl<A: SessionApi + 'static> SessionController<A> {
    pub fn new(context: SessionContext, api: Arc<A>, initial_session: Option<String>) -> Self {
        let state = ConvState::new(initial_session);
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (views, _) = watch::channel(ConversationView::new(&state, 0));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shutdown = CancellationToken::new();
        let guard = Some(Arc::new(shutdown.clone().drop_guard()));

        Self {
            context,
            state,
            api,
            transport: None,
            intent_tx,
            intent_rx,
            completion_tx,
            completion_rx,
            push_tx,
            push_rx,
            views,
            notifications,
            shutdown,
            guard,
            busy: 0,
        }
    }

    /// Handle for the presentation layer. Dropping every handle unmounts.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            intents: self.intent_tx.clone(),
            views: self.views.subscribe(),
            notifications: self.notifications.clone(),
            shutdown: self.shutdown.clone(),
            _guard: self.guard.clone(),
        }
    }

    pub async fn run(mut self) {
        self.guard = None;
        tracing::info!(
            tool = %self.context.tool_name,
            session_id = ?self.state.session_id,
            "Mounting session page"
        );

        self.apply(Event::Mount);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(event) = self.completion_rx.recv() => {
                    self.busy = self.busy.saturating_sub(1);
                    self.apply(event);
                }
                Some(event) = self.push_rx.recv() => self.on_push(event),
                Some(event) = self.intent_rx.recv() => self.apply(event),
                else => break,
            }
        }

        self.unmount();
    }

    fn apply(&mut self, event: Event) {
        let rejected_operation = event.is_user_intent().then(|| operation_of(&event));

        match transition(&self.state, &self.context, event) {
            Ok(result) => {
                if result.new_state.phase != self.state.phase {
                    tracing::debug!(from = ?self.state.phase, to = ?result.new_state.phase, "Phase change");
                }
                self.state = result.new_state;
                for effect in result.effects {
                    self.execute(effect);
                }
            }
            Err(e) => match rejected_operation {
                Some(operation) => {
                    tracing::info!(%operation, reason = %e, "Intent rejected");
                    self.notify(Notification::rejected(operation, e.to_string()));
                }
                None => tracing::warn!(error = %e, "Dropping event"),
            },
        }

        self.publish();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::CreateSession { title, tool_id } => {
                let api = Arc::clone(&self.api);
                self.spawn(async move {
                    match api.create_session(&SessionCreate { title, tool_id }).await {
                        Ok(session) => {
                            tracing::info!(session_id = %session.id, "Session created");
                            Event::SessionCreated {
                                session_id: session.id,
                            }
                        }
                        Err(error) => Event::SessionCreateFailed { error },
                    }
                });
            }

            Effect::FetchHistory { offset, limit } => {
                let Some(transport) = self.transport() else {
                    return;
                };
                let fetch = transport.fetch_messages(offset, limit);
                self.spawn(async move {
                    match fetch.await {
                        Ok(messages) => Event::HistoryLoaded { messages },
                        Err(error) => Event::HistoryFailed { error },
                    }
                });
            }

            Effect::OpenPushChannel => {
                let sink = self.push_tx.clone();
                let Some(transport) = self.transport() else {
                    return;
                };
                if let Err(e) = transport.open_push_channel(sink) {
                    tracing::warn!(error = %e, "Failed to open push channel");
                    self.notify(Notification::server_error(Operation::PushChannel, e.message));
                }
            }

            Effect::ClosePushChannel => {
                if let Some(transport) = self.transport.as_mut() {
                    transport.close_push_channel();
                }
            }

            Effect::SendMessage { body } => {
                let Some(transport) = self.transport() else {
                    return;
                };
                let send = transport.send_message(body);
                self.spawn(async move {
                    match send.await {
                        Ok(message) => Event::MessageSent { message },
                        Err(error) => Event::SendFailed { error },
                    }
                });
            }

            Effect::Rate { message_id, rating } => {
                let Some(transport) = self.transport() else {
                    return;
                };
                let rate = transport.rate(message_id.clone(), rating);
                self.spawn(async move {
                    match rate.await {
                        Ok(_) => Event::RateAccepted { message_id, rating },
                        Err(error) => Event::RateFailed { message_id, error },
                    }
                });
            }

            Effect::Regenerate { message_id } => {
                let Some(transport) = self.transport() else {
                    return;
                };
                let regenerate = transport.regenerate(message_id.clone());
                self.spawn(async move {
                    match regenerate.await {
                        Ok(()) => Event::RegenerateAccepted { message_id },
                        Err(error) => Event::RegenerateFailed { message_id, error },
                    }
                });
            }

            Effect::Notify(notification) => self.notify(notification),
        }
    }

    /// Transport for the current session, created on first use
    fn transport(&mut self) -> Option<&mut SessionTransport<A>> {
        if self.transport.is_none() {
            let Some(session_id) = self.state.session_id.clone() else {
                tracing::error!("Session effect without a session id");
                return None;
            };
            let route = SessionRoute::new(session_id, self.context.tool_name.clone());
            self.transport = Some(SessionTransport::new(Arc::clone(&self.api), route));
        }
        self.transport.as_mut()
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        self.busy += 1;
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            if completions.send(event).is_err() {
                tracing::debug!("Page unmounted, discarding completion");
            }
        });
    }

    fn on_push(&mut self, event: PushEvent) {
        let accepted = self
            .transport
            .as_ref()
            .is_some_and(|transport| transport.accepts(&event));
        if !accepted {
            tracing::debug!(generation = event.generation, "Dropping stale push event");
            return;
        }

        let event = match event.payload {
            PushPayload::Message(message) => Event::PushMessage { message: *message },
            PushPayload::Failed(error) => Event::PushFailed { error },
            PushPayload::Closed => Event::PushClosed,
        };
        self.apply(event);
    }

    fn notify(&self, notification: Notification) {
        tracing::debug!(%notification, "Notification");
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn publish(&self) {
        self.views
            .send_replace(ConversationView::new(&self.state, self.busy));
    }

    fn unmount(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close_push_channel();
        }
        tracing::info!(session_id = ?self.state.session_id, "Session page unmounted");
    }
}

fn operation_of(event: &Event) -> Operation {
    match event {
        Event::UserRate { .. } => Operation::Rate,
        Event::UserRegenerate { .. } => Operation::Regenerate,
        _ => Operation::Send,
    }
}

/// Presentation-side handle to a running controller
#[derive(Clone)]
pub struct SessionHandle {
    intents: mpsc::UnboundedSender<Event>,
    views: watch::Receiver<ConversationView>,
    notifications: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
    _guard: Option<Arc<DropGuard>>,
}

impl SessionHandle {
    pub fn send(&self, text: impl Into<String>) -> Result<(), Unmounted> {
        self.intent(Event::UserSend { text: text.into() })
    }

    pub fn rate(&self, message_id: impl Into<String>, rating: Rating) -> Result<(), Unmounted> {
        self.intent(Event::UserRate {
            message_id: message_id.into(),
            rating,
        })
    }

    pub fn regenerate(&self, message_id: impl Into<String>) -> Result<(), Unmounted> {
        self.intent(Event::UserRegenerate {
            message_id: message_id.into(),
        })
    }

    /// Stop the controller and close the push channel. Idempotent.
    pub fn unmount(&self) {
        self.shutdown.cancel();
    }

    pub fn is_unmounted(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn views(&self) -> watch::Receiver<ConversationView> {
        self.views.clone()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    fn intent(&self, event: Event) -> Result<(), Unmounted> {
        if self.is_unmounted() {
            return Err(Unmounted);
        }
        self.intents.send(event).map_err(|_| Unmounted)
    }
}
