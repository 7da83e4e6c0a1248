//! Typed publish/subscribe registry for client events.
//!
//! Handlers run synchronously on the task that emits, in emission order. Every
//! handler registered for a kind sees the same event instance. The handler list
//! is snapshotted before dispatch, so subscribing or unsubscribing from inside a
//! handler only affects later emissions.

use crate::audio::AudioChunk;
use crate::error::RealtimeError;
use crate::protocol::{Content, GoAway, ToolCall, ToolCallCancellation};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tag used to subscribe to one kind of [`LiveEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    SetupComplete,
    Content,
    Audio,
    Interrupted,
    TurnComplete,
    ToolCall,
    ToolCallCancellation,
    Transcription,
    GoAway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionSource {
    /// What the user said.
    Input,
    /// What the model said.
    Output,
}

#[derive(Debug)]
pub enum LiveEvent {
    Open,
    Close { reason: Option<String> },
    Error(RealtimeError),
    SetupComplete,
    /// Non-audio parts of a model turn.
    Content(Content),
    Audio(AudioChunk),
    Interrupted,
    TurnComplete,
    /// All function calls of one `toolCall` frame.
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    Transcription {
        source: TranscriptionSource,
        text: String,
    },
    GoAway(GoAway),
}

impl LiveEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close { .. } => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::SetupComplete => EventKind::SetupComplete,
            Self::Content(_) => EventKind::Content,
            Self::Audio(_) => EventKind::Audio,
            Self::Interrupted => EventKind::Interrupted,
            Self::TurnComplete => EventKind::TurnComplete,
            Self::ToolCall(_) => EventKind::ToolCall,
            Self::ToolCallCancellation(_) => EventKind::ToolCallCancellation,
            Self::Transcription { .. } => EventKind::Transcription,
            Self::GoAway(_) => EventKind::GoAway,
        }
    }
}

/// Handle returned by [`EventEmitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Handler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
pub struct EventEmitter {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Delivers `event` to every handler subscribed to its kind.
    pub fn emit(&self, event: LiveEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_only_matching_kind() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        emitter.on(EventKind::TurnComplete, move |e| log.lock().push(e.kind()));
        let log = seen.clone();
        emitter.on(EventKind::Interrupted, move |e| log.lock().push(e.kind()));

        emitter.emit(LiveEvent::Interrupted);
        emitter.emit(LiveEvent::SetupComplete);
        emitter.emit(LiveEvent::TurnComplete);

        assert_eq!(
            *seen.lock(),
            vec![EventKind::Interrupted, EventKind::TurnComplete]
        );
    }

    #[test]
    fn test_subscribers_share_one_instance() {
        let emitter = EventEmitter::new();
        let addresses = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let addresses = addresses.clone();
            emitter.on(EventKind::Open, move |e| {
                addresses.lock().push(e as *const LiveEvent as usize)
            });
        }
        emitter.emit(LiveEvent::Open);
        let addresses = addresses.lock();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0], addresses[1]);
    }

    #[test]
    fn test_off_during_dispatch_does_not_affect_current_pass() {
        let emitter = Arc::new(EventEmitter::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let second_id = Arc::new(Mutex::new(None));

        {
            let emitter = emitter.clone();
            let calls = calls.clone();
            let second_id = second_id.clone();
            emitter.clone().on(EventKind::Content, move |_| {
                calls.lock().push("first");
                if let Some(id) = *second_id.lock() {
                    emitter.off(id);
                }
            });
        }
        let calls_second = calls.clone();
        let id = emitter.on(EventKind::Content, move |_| calls_second.lock().push("second"));
        *second_id.lock() = Some(id);

        emitter.emit(LiveEvent::Content(Content::text("a")));
        assert_eq!(*calls.lock(), vec!["first", "second"]);

        emitter.emit(LiveEvent::Content(Content::text("b")));
        assert_eq!(*calls.lock(), vec!["first", "second", "first"]);
        assert!(!emitter.off(id));
    }

    #[test]
    fn test_on_during_dispatch_applies_to_next_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let count = Arc::new(AtomicU64::new(0));
        {
            let inner = emitter.clone();
            let count = count.clone();
            emitter.on(EventKind::Audio, move |_| {
                let count = count.clone();
                inner.on(EventKind::Audio, move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        let chunk = || LiveEvent::Audio(AudioChunk::from_samples(&[0], 24_000));
        emitter.emit(chunk());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        emitter.emit(chunk());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Two handlers registered by now, each counting once.
        emitter.emit(chunk());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
