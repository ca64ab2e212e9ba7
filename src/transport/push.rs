//! Push channel handle
//!
//! Every inbound frame is either the literal keepalive token or a JSON
//! encoded message. Delivery is at-most-once: frames that arrive while no
//! subscriber is attached, and frames that fail to parse, are dropped.
//!
//! Events are tagged with the channel's generation. Closing clears the
//! subscriber before stopping the reader, and consumers compare generations
//! so that events already queued when `close` returned are recognised as
//! stale and discarded.

use super::TransportError;
use crate::model::Message;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Frame sent by the backend to keep the socket alive
pub const KEEPALIVE_TOKEN: &str = "ping";

/// Raw text frames as produced by a transport
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Decoded push frame
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    Keepalive,
    Message(Box<Message>),
}

/// Classify a text frame. Anything that is neither the keepalive token nor a
/// message is a protocol violation.
pub fn parse_frame(text: &str) -> Result<PushFrame, TransportError> {
    if text == KEEPALIVE_TOKEN {
        return Ok(PushFrame::Keepalive);
    }
    serde_json::from_str::<Message>(text)
        .map(|message| PushFrame::Message(Box::new(message)))
        .map_err(|e| TransportError::protocol_violation(format!("malformed push frame: {e}")))
}

/// Event delivered to the subscriber
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub generation: u64,
    pub payload: PushPayload,
}

#[derive(Debug, Clone)]
pub enum PushPayload {
    Message(Box<Message>),
    /// Socket error; the reader has stopped
    Failed(TransportError),
    /// Remote end closed the connection
    Closed,
}

type Subscriber = Arc<Mutex<Option<mpsc::UnboundedSender<PushEvent>>>>;

/// Handle to one persistent push connection
pub struct PushChannel {
    session_id: String,
    generation: u64,
    /// Taken by the reader task on first subscribe
    frames: Option<FrameStream>,
    subscriber: Subscriber,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl PushChannel {
    pub fn new(session_id: impl Into<String>, frames: FrameStream) -> Self {
        Self {
            session_id: session_id.into(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            frames: Some(frames),
            subscriber: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            reader: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Attach `sink` as the subscriber, replacing any previous one. The
    /// reader task starts on the first subscription.
    pub fn subscribe(
        &mut self,
        sink: mpsc::UnboundedSender<PushEvent>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::invalid_argument("push channel is closed"));
        }

        *lock(&self.subscriber) = Some(sink);

        if let Some(frames) = self.frames.take() {
            self.reader = Some(tokio::spawn(read_frames(
                self.session_id.clone(),
                self.generation,
                frames,
                Arc::clone(&self.subscriber),
                self.cancel.clone(),
            )));
        }
        Ok(())
    }

    /// Detach the subscriber; frames received meanwhile are dropped
    pub fn unsubscribe(&mut self) {
        lock(&self.subscriber).take();
    }

    /// Idempotent. No event is delivered to the subscriber after this returns.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.unsubscribe();
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.frames = None;
        tracing::debug!(session_id = %self.session_id, generation = self.generation, "Push channel closed");
    }

    /// Whether `event` came from this channel and the channel is still open
    pub fn accepts(&self, event: &PushEvent) -> bool {
        !self.is_closed() && event.generation == self.generation
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(subscriber: &Subscriber) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<PushEvent>>> {
    subscriber.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_frames(
    session_id: String,
    generation: u64,
    mut frames: FrameStream,
    subscriber: Subscriber,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = frames.next() => next,
        };

        let payload = match next {
            Some(Ok(text)) => match parse_frame(&text) {
                Ok(PushFrame::Keepalive) => {
                    tracing::trace!(%session_id, "Push keepalive");
                    continue;
                }
                Ok(PushFrame::Message(message)) => PushPayload::Message(message),
                Err(e) => {
                    tracing::warn!(%session_id, error = %e, "Dropping push frame");
                    continue;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(%session_id, error = %e, "Push channel failed");
                deliver(&subscriber, generation, PushPayload::Failed(e));
                break;
            }
            None => {
                tracing::debug!(%session_id, "Push channel ended by remote");
                deliver(&subscriber, generation, PushPayload::Closed);
                break;
            }
        };

        deliver(&subscriber, generation, payload);
    }
}

fn deliver(subscriber: &Subscriber, generation: u64, payload: PushPayload) {
    let guard = lock(subscriber);
    match guard.as_ref() {
        Some(sink) => {
            if sink.send(PushEvent { generation, payload }).is_err() {
                tracing::debug!(generation, "Push subscriber gone, frame dropped");
            }
        }
        None => tracing::debug!(generation, "No push subscriber, frame dropped"),
    }
}
