//! The relay: one HTTP endpoint that fronts every provider adapter and re-exposes their chunks
//! as a single text event stream.
//!
//! # Architecture
//!
//! - [`encoder`]: chunks to events, server side
//! - [`decoder`]: events to chunks, client side, plus the [`Transport`] the session opens turns
//!   through
//! - [`auth`]: the Basic authentication gate
//! - [`server`]: the axum router
//! - [`config`]: command-line and environment configuration

pub mod auth;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod server;

pub use auth::BasicAuth;
pub use config::{RelayArgs, RelayConfig};
pub use decoder::{
    DEFAULT_RELAY_URL, RelayClient, RelayEvent, Transport, TurnEvent, TurnHandle, decode_events,
};
pub use encoder::{encode_chunk, relay_stream};
pub use server::{RELAY_PATH, RelayState, router};
