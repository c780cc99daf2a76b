// Public modules
pub mod anthropic_event;
pub mod chunk;
pub mod delta;
pub mod message;
pub mod model_def;
pub mod openai_chunk;
pub mod relay_request;

// Re-exports
pub use anthropic_event::{
    AnthropicMessage, AnthropicRequest, AnthropicRole, AnthropicStreamEvent, ContentDelta,
    MessageStart, StreamError,
};
pub use chunk::Chunk;
pub use delta::Delta;
pub use message::{Message, Role};
pub use model_def::{
    MODEL_DEFS, ModelDef, ProviderKind, default_model, model_def, provider_for_model,
};
pub use openai_chunk::{ChatCompletionChunk, ChatCompletionRequest, ChoiceDelta, ChunkChoice};
pub use relay_request::RelayRequest;
