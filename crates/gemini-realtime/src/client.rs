//! The event-emitting Live API client.
//!
//! One receive task per session owns the transport's event channel and drives
//! decode -> dispatch synchronously, so handlers observe events strictly in
//! wire order. Send operations are synchronous and only queue frames on the
//! transport.
//!
//! State machine: `Idle -> Connecting -> SetupPending -> Ready -> Closing -> Idle`,
//! with any transport close or error taking the session back to `Idle`.

use crate::audio::{AudioChunk, PlaybackQueue};
use crate::codec::{self, RawFrame};
use crate::config::ConnectionConfig;
use crate::error::{RealtimeError, Result, StateError};
use crate::events::{EventEmitter, EventKind, LiveEvent, SubscriptionId, TranscriptionSource};
use crate::protocol::{
    ClientContent, Content, InboundFrame, OutboundFrame, RealtimeInput, ServerContent, ToolResponse,
};
use crate::transport::{Transport, TransportEvent};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    SetupPending,
    Ready,
    Closing,
}

struct Session {
    state: ClientState,
    /// Incremented per `connect`; stale tasks compare against it.
    id: u64,
    /// The transport opened for this session, so ending it emits `Close`.
    opened: bool,
    /// Transport connection owned by this session, once the handshake is done.
    connection: Option<u64>,
    setup_waiter: Option<oneshot::Sender<Result<()>>>,
    receive_task: Option<JoinHandle<()>>,
    /// Function-call ids surfaced to subscribers and not yet answered or cancelled.
    pending_calls: Vec<String>,
}

struct Shared {
    transport: Transport,
    emitter: EventEmitter,
    session: Mutex<Session>,
    playback: Mutex<Option<Arc<PlaybackQueue>>>,
}

/// Client for one Live API session at a time.
///
/// Cloning yields another handle to the same client, which is how handlers and
/// background tasks reach the send operations.
#[derive(Clone)]
pub struct LiveClient {
    shared: Arc<Shared>,
}

impl Default for LiveClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("state", &self.state())
            .finish()
    }
}

impl LiveClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                transport: Transport::new(),
                emitter: EventEmitter::new(),
                session: Mutex::new(Session {
                    state: ClientState::Idle,
                    id: 0,
                    opened: false,
                    connection: None,
                    setup_waiter: None,
                    receive_task: None,
                    pending_calls: Vec::new(),
                }),
                playback: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        self.shared.session.lock().state
    }

    /// Tool-call ids that have been surfaced but neither answered nor cancelled.
    pub fn pending_tool_calls(&self) -> Vec<String> {
        self.shared.session.lock().pending_calls.clone()
    }

    /// Routes inbound audio into `queue` and flushes it on interruption and
    /// session end.
    pub fn attach_playback(&self, queue: Arc<PlaybackQueue>) {
        *self.shared.playback.lock() = Some(queue);
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        self.shared.emitter.on(kind, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.emitter.off(id)
    }

    /// Opens a session and resolves once the server acknowledges `setup`.
    ///
    /// The `setup` frame is the first frame written on the new connection.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<()> {
        config.validate()?;
        let url = config.url()?;

        let session_id = {
            let mut session = self.shared.session.lock();
            match session.state {
                ClientState::Idle => {}
                ClientState::Connecting | ClientState::SetupPending => {
                    return Err(StateError::AlreadyConnecting.into());
                }
                ClientState::Ready | ClientState::Closing => {
                    return Err(StateError::AlreadyConnected.into());
                }
            }
            session.id += 1;
            session.state = ClientState::Connecting;
            session.opened = false;
            session.connection = None;
            session.pending_calls.clear();
            session.id
        };
        let mut guard = ConnectGuard {
            shared: &self.shared,
            session_id,
            armed: true,
        };
        info!(model = %config.model, "Connecting to Live API.");

        let connection = match self.shared.transport.connect(url.as_str()).await {
            Ok(connection) => connection,
            Err(e @ RealtimeError::State(_)) => return Err(e),
            Err(e) => return Err(RealtimeError::connection(e.to_string())),
        };

        let (setup_tx, setup_rx) = oneshot::channel();
        {
            let mut session = self.shared.session.lock();
            if session.id != session_id || session.state != ClientState::Connecting {
                // Only this attempt's own connection; a newer session may own the transport.
                self.shared.transport.close_connection(connection.id);
                return Err(RealtimeError::connection("connect was superseded"));
            }
            session.state = ClientState::SetupPending;
            session.opened = true;
            session.connection = Some(connection.id);
            session.setup_waiter = Some(setup_tx);
        }

        self.send_frame(&OutboundFrame::Setup(config.setup()))?;

        let task = tokio::spawn(receive_loop(
            Arc::downgrade(&self.shared),
            session_id,
            connection.events,
        ));
        self.shared.session.lock().receive_task = Some(task);

        let outcome = match config.setup_timeout {
            Some(limit) => match tokio::time::timeout(limit, setup_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(?limit, "Timed out waiting for setupComplete.");
                    guard.armed = false;
                    self.shared.finish(session_id, None, Some("setup timed out".into()));
                    return Err(RealtimeError::SetupTimeout(limit));
                }
            },
            None => setup_rx.await,
        };
        guard.armed = false;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::connection(
                "session ended before setup completed",
            )),
        }
    }

    /// Closes the session. Does nothing when already idle.
    pub fn disconnect(&self) {
        let session_id = self.shared.session.lock().id;
        self.shared.finish(session_id, None, None);
    }

    /// Sends one `realtimeInput` frame per chunk.
    pub fn send_realtime_input(&self, chunks: &[AudioChunk]) -> Result<()> {
        self.ensure_ready()?;
        for chunk in chunks {
            self.send_frame(&OutboundFrame::RealtimeInput(RealtimeInput {
                media_chunks: vec![chunk.to_blob()],
            }))?;
        }
        Ok(())
    }

    pub fn send_client_content(&self, turns: Vec<Content>, turn_complete: bool) -> Result<()> {
        self.ensure_ready()?;
        self.send_frame(&OutboundFrame::ClientContent(ClientContent {
            turns,
            turn_complete,
        }))
    }

    /// Sends a complete user turn containing `text`.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_client_content(vec![Content::user_text(text)], true)
    }

    /// Answers tool calls. Ids are passed through; correlating them with
    /// earlier calls is the caller's job. Ids stay pending if the frame
    /// could not be queued.
    pub fn send_tool_response(&self, response: ToolResponse) -> Result<()> {
        self.ensure_ready()?;
        let ids: Vec<String> = response
            .function_responses
            .iter()
            .map(|answer| answer.id.clone())
            .collect();
        self.send_frame(&OutboundFrame::ToolResponse(response))?;

        let mut session = self.shared.session.lock();
        for id in ids {
            match session.pending_calls.iter().position(|pending| *pending == id) {
                Some(index) => {
                    session.pending_calls.remove(index);
                }
                None => debug!(%id, "Tool response for an id that is not pending."),
            }
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ClientState::Ready => Ok(()),
            ClientState::Connecting | ClientState::SetupPending => Err(StateError::NotReady.into()),
            ClientState::Idle | ClientState::Closing => Err(StateError::NotConnected.into()),
        }
    }

    fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        let text = codec::encode(frame)?;
        debug!(kind = frame.kind(), "Sending frame.");
        trace!(raw = %text, "Raw outbound frame");
        self.shared.transport.send(RawFrame::Text(text))
    }
}

/// Ends the session if `connect` fails or its future is dropped before the
/// session is ready.
struct ConnectGuard<'a> {
    shared: &'a Shared,
    session_id: u64,
    armed: bool,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .finish(self.session_id, None, Some("connect abandoned".into()));
        }
    }
}

impl Shared {
    fn is_current(&self, session_id: u64) -> bool {
        let session = self.session.lock();
        session.id == session_id
            && matches!(session.state, ClientState::SetupPending | ClientState::Ready)
    }

    /// Emits `event` unless the session has ended in the meantime, for
    /// example because a handler disconnected.
    fn emit_current(&self, session_id: u64, event: LiveEvent) -> bool {
        if !self.is_current(session_id) {
            return false;
        }
        self.emitter.emit(event);
        true
    }

    fn flush_playback(&self) -> usize {
        let playback = self.playback.lock().clone();
        playback.map_or(0, |queue| queue.clear())
    }

    /// Tears the session down once. The transport is closed before any
    /// `error`/`close` event is emitted.
    fn finish(&self, session_id: u64, error: Option<RealtimeError>, reason: Option<String>) {
        let (waiter, task, pending, opened, connection) = {
            let mut session = self.session.lock();
            let active = matches!(
                session.state,
                ClientState::Connecting | ClientState::SetupPending | ClientState::Ready
            );
            if session.id != session_id || !active {
                return;
            }
            session.state = ClientState::Closing;
            (
                session.setup_waiter.take(),
                session.receive_task.take(),
                std::mem::take(&mut session.pending_calls),
                session.opened,
                session.connection.take(),
            )
        };

        match connection {
            Some(id) => self.transport.close_connection(id),
            // Still handshaking: abandon the attempt this session started.
            None => self.transport.close(),
        }
        self.flush_playback();
        if let Some(task) = task {
            task.abort();
        }
        if !pending.is_empty() {
            warn!(ids = ?pending, "Session ended with unanswered tool calls.");
        }

        if let Some(waiter) = waiter {
            let message = match (&error, &reason) {
                (Some(e), _) => e.to_string(),
                (None, Some(reason)) => reason.clone(),
                (None, None) => "disconnected".to_string(),
            };
            let _ = waiter.send(Err(RealtimeError::connection(message)));
        }

        if opened {
            if let Some(error) = error {
                self.emitter.emit(LiveEvent::Error(error));
            }
            info!(?reason, "Live session closed.");
            self.emitter.emit(LiveEvent::Close { reason });
        }

        let mut session = self.session.lock();
        if session.id == session_id {
            session.state = ClientState::Idle;
            session.opened = false;
        }
    }

    fn dispatch(&self, session_id: u64, frame: InboundFrame) {
        trace!(kind = frame.kind(), "Dispatching frame.");
        match frame {
            InboundFrame::SetupComplete => {
                let waiter = {
                    let mut session = self.session.lock();
                    if session.state != ClientState::SetupPending {
                        warn!("Ignoring setupComplete outside of setup.");
                        return;
                    }
                    session.state = ClientState::Ready;
                    session.setup_waiter.take()
                };
                info!("Live session setup is complete.");
                self.emit_current(session_id, LiveEvent::SetupComplete);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            InboundFrame::ServerContent(content) => self.dispatch_server_content(session_id, content),
            InboundFrame::ToolCall(call) => {
                {
                    let mut session = self.session.lock();
                    for function_call in &call.function_calls {
                        if !session.pending_calls.contains(&function_call.id) {
                            session.pending_calls.push(function_call.id.clone());
                        }
                    }
                }
                debug!(
                    calls = ?call.function_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "Received tool call."
                );
                self.emit_current(session_id, LiveEvent::ToolCall(call));
            }
            InboundFrame::ToolCallCancellation(cancellation) => {
                self.session
                    .lock()
                    .pending_calls
                    .retain(|id| !cancellation.ids.contains(id));
                debug!(ids = ?cancellation.ids, "Received tool call cancellation.");
                self.emit_current(session_id, LiveEvent::ToolCallCancellation(cancellation));
            }
            InboundFrame::GoAway(go_away) => {
                warn!(time_left = ?go_away.time_left, "Server announced disconnect.");
                self.emit_current(session_id, LiveEvent::GoAway(go_away));
            }
        }
    }

    fn dispatch_server_content(&self, session_id: u64, content: ServerContent) {
        if let Some(transcription) = content.input_transcription {
            let event = LiveEvent::Transcription {
                source: TranscriptionSource::Input,
                text: transcription.text,
            };
            if !self.emit_current(session_id, event) {
                return;
            }
        }

        if let Some(turn) = content.model_turn {
            let (audio, other): (Vec<_>, Vec<_>) =
                turn.parts.into_iter().partition(|part| part.audio().is_some());
            let playback = self.playback.lock().clone();
            for blob in audio.into_iter().filter_map(|part| part.inline_data) {
                let chunk = AudioChunk::from_blob(&blob);
                if let Some(queue) = &playback {
                    if let Err(e) = queue.enqueue(&chunk) {
                        warn!(error = %e, "Dropping audio chunk that could not be queued.");
                    }
                }
                if !self.emit_current(session_id, LiveEvent::Audio(chunk)) {
                    return;
                }
            }
            if !other.is_empty() {
                let event = LiveEvent::Content(Content {
                    role: turn.role,
                    parts: other,
                });
                if !self.emit_current(session_id, event) {
                    return;
                }
            }
        }

        if let Some(transcription) = content.output_transcription {
            let event = LiveEvent::Transcription {
                source: TranscriptionSource::Output,
                text: transcription.text,
            };
            if !self.emit_current(session_id, event) {
                return;
            }
        }

        if content.interrupted {
            let dropped = self.flush_playback();
            debug!(dropped, "Model output interrupted.");
            if !self.emit_current(session_id, LiveEvent::Interrupted) {
                return;
            }
        }

        if content.turn_complete {
            self.emit_current(session_id, LiveEvent::TurnComplete);
        }
    }
}

async fn receive_loop(
    shared: Weak<Shared>,
    session_id: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.is_current(session_id) {
            return;
        }
        match event {
            TransportEvent::Open => {
                shared.emit_current(session_id, LiveEvent::Open);
            }
            TransportEvent::Message(raw) => match codec::decode(&raw) {
                Ok(frame) => shared.dispatch(session_id, frame),
                Err(e) => warn!(error = %e, "Discarding undecodable frame."),
            },
            TransportEvent::Close(reason) => {
                shared.finish(session_id, None, reason);
                return;
            }
            TransportEvent::Error(message) => {
                error!(%message, "Transport failed; ending session.");
                shared.finish(session_id, Some(RealtimeError::transport(message)), None);
                return;
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.finish(session_id, None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FunctionResponse;

    #[test]
    fn test_sends_fail_when_idle() {
        let client = LiveClient::new();
        assert_eq!(client.state(), ClientState::Idle);
        let err = client.send_text("hello").unwrap_err();
        assert!(matches!(err, RealtimeError::State(StateError::NotConnected)));
        let err = client
            .send_tool_response(ToolResponse {
                function_responses: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, RealtimeError::State(StateError::NotConnected)));
    }

    #[test]
    fn test_disconnect_when_idle_is_a_no_op() {
        let client = LiveClient::new();
        let closes = Arc::new(Mutex::new(0));
        let counter = closes.clone();
        client.on(EventKind::Close, move |_| *counter.lock() += 1);
        client.disconnect();
        client.disconnect();
        assert_eq!(*closes.lock(), 0);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn test_unsent_tool_response_keeps_calls_pending() {
        let client = LiveClient::new();
        {
            let mut session = client.shared.session.lock();
            session.state = ClientState::Ready;
            session.pending_calls = vec!["call-1".into(), "call-2".into()];
        }

        // The transport has no connection, so the frame cannot be queued.
        let err = client
            .send_tool_response(ToolResponse {
                function_responses: vec![FunctionResponse::new(
                    "call-1",
                    serde_json::json!({"ok": true}),
                )],
            })
            .unwrap_err();
        assert!(matches!(err, RealtimeError::State(StateError::NotConnected)));
        assert_eq!(client.pending_tool_calls(), vec!["call-1", "call-2"]);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_connecting() {
        let client = LiveClient::new();
        let config = ConnectionConfig::new("", "m1").with_endpoint("ws://127.0.0.1:1");
        let err = client.connect(&config).await.unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/live", listener.local_addr().unwrap());
        drop(listener);

        let client = LiveClient::new();
        let config = ConnectionConfig::new("key", "m1").with_endpoint(endpoint);
        let err = client.connect(&config).await.unwrap_err();
        assert!(matches!(err, RealtimeError::Connection(_)));
        assert_eq!(client.state(), ClientState::Idle);
    }
}
