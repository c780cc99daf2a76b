use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The upstream protocol family that serves a model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI's chat completions API.
    OpenAi,

    /// Anthropic's messages API.
    Anthropic,

    /// Hyperbolic, an OpenAI-compatible third party.
    Hyperbolic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Hyperbolic => write!(f, "hyperbolic"),
        }
    }
}

/// A model the relay knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDef {
    /// The identifier sent to the provider and accepted by the relay.
    pub api_name: &'static str,

    /// Human-readable label.
    pub display_name: &'static str,

    /// The adapter family that serves this model.
    pub provider: ProviderKind,
}

/// The static model registry.  The first entry is the default model.
pub const MODEL_DEFS: &[ModelDef] = &[
    ModelDef {
        api_name: "gpt-4o-2024-05-13",
        display_name: "GPT-4o",
        provider: ProviderKind::OpenAi,
    },
    ModelDef {
        api_name: "gpt-4o-mini-2024-07-18",
        display_name: "GPT-4o Mini",
        provider: ProviderKind::OpenAi,
    },
    ModelDef {
        api_name: "gpt-4-turbo-2024-04-09",
        display_name: "GPT-4-Turbo",
        provider: ProviderKind::OpenAi,
    },
    ModelDef {
        api_name: "claude-3-5-sonnet-20240620",
        display_name: "Claude 3.5 Sonnet",
        provider: ProviderKind::Anthropic,
    },
    ModelDef {
        api_name: "claude-3-opus-20240229",
        display_name: "Claude 3 Opus",
        provider: ProviderKind::Anthropic,
    },
    ModelDef {
        api_name: "meta-llama/Meta-Llama-3.1-405B-Instruct",
        display_name: "Llama 3.1 405B Instruct",
        provider: ProviderKind::Hyperbolic,
    },
];

/// Look up a model definition by its API name.
pub fn model_def(model: &str) -> Option<&'static ModelDef> {
    MODEL_DEFS.iter().find(|def| def.api_name == model)
}

/// Map a model identifier to the provider that serves it.
///
/// # Errors
///
/// Returns [`Error::UnknownModel`] if the identifier is not registered.
pub fn provider_for_model(model: &str) -> Result<ProviderKind> {
    model_def(model)
        .map(|def| def.provider)
        .ok_or_else(|| Error::unknown_model(model))
}

/// The model selected when no preference has been stored.
pub fn default_model() -> &'static ModelDef {
    &MODEL_DEFS[0]
}
