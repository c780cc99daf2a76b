use serde::{Deserialize, Serialize};

use crate::types::Message;

/// The JSON body POSTed to the relay endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// The conversation so far, ending with the user message to answer.
    pub messages: Vec<Message>,

    /// The model identifier; must be present in the model registry.
    pub model: String,
}

impl RelayRequest {
    /// Create a new relay request.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: model.into(),
        }
    }
}
