//! Client for the Gemini Live bidirectional streaming API.
//!
//! [`LiveClient`] owns one WebSocket session: it sends the `setup` frame,
//! waits for `setupComplete`, and then turns inbound frames into typed
//! [`LiveEvent`]s delivered to subscribers in wire order. The [`audio`] module
//! adapts microphone capture and speaker playback to the wire's PCM16 format.

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

pub use client::{ClientState, LiveClient};
pub use config::{ConnectionConfig, ToolDeclaration};
pub use error::{ConfigError, DecodeError, RealtimeError, Result, StateError};
pub use events::{EventKind, LiveEvent, SubscriptionId, TranscriptionSource};
pub use protocol::{Content, FunctionCall, FunctionResponse, ResponseModality, ToolResponse};
