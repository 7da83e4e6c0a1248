//! Hotel Concierge Library Crate
//!
//! A voice/text hotel-search assistant built on the Live API client. The model
//! answers questions itself and calls the `search_hotels` tool, which this
//! crate serves from an HTTP semantic-search backend. The `concierge` binary is
//! a thin terminal front end around this library.

pub mod config;
pub mod pcm_sink;
pub mod search;
