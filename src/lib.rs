// Public modules
pub mod accumulate;
pub mod chat;
pub mod error;
pub mod observability;
pub mod provider;
pub mod relay;
pub mod sse;
pub mod store;
pub mod types;

// Re-exports
pub use accumulate::{Fragment, accumulate};
pub use chat::{ChatSession, SessionState, TurnOutcome, TurnUpdate};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use provider::{ChunkStream, Completion, Provider, Providers};
pub use relay::{RelayClient, Transport, TurnHandle};
pub use store::{FileStore, MemoryStore, Store};
pub use types::*;
