//! Configuration for the relay server.
//!
//! Addresses and policies come from the command line via `arrrg`; credentials come from the
//! environment so they never appear in process listings.

use std::net::SocketAddr;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};
use crate::provider::anthropic::{ANTHROPIC_API_URL, DEFAULT_MAX_TOKENS};
use crate::provider::openai::{HYPERBOLIC_API_URL, OPENAI_API_URL};
use crate::provider::{
    AnthropicAdapter, DecodingParams, OpenAiAdapter, Provider, Providers, SystemPreamble,
};
use crate::relay::auth::BasicAuth;
use crate::relay::encoder::DEFAULT_IDLE_TIMEOUT;
use crate::types::ProviderKind;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Command-line arguments for relaychat-server.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct RelayArgs {
    /// Address to listen on.
    #[arrrg(optional, "Address to listen on (default: 127.0.0.1:3000)", "ADDR")]
    pub bind: Option<String>,

    /// OpenAI base URL.
    #[arrrg(optional, "OpenAI base URL", "URL")]
    pub openai_url: Option<String>,

    /// Anthropic base URL.
    #[arrrg(optional, "Anthropic base URL", "URL")]
    pub anthropic_url: Option<String>,

    /// Hyperbolic base URL.
    #[arrrg(optional, "Hyperbolic (OpenAI-compatible) base URL", "URL")]
    pub hyperbolic_url: Option<String>,

    /// Upstream connect timeout in seconds.
    #[arrrg(optional, "Upstream connect timeout in seconds (default: 30)", "SECS")]
    pub connect_timeout: Option<u64>,

    /// Upstream idle timeout in seconds.
    #[arrrg(optional, "Abandon upstream streams idle this many seconds (default: 60)", "SECS")]
    pub idle_timeout: Option<u64>,

    /// Anthropic completion length cap.
    #[arrrg(optional, "max_tokens sent to Anthropic models (default: 1024)", "TOKENS")]
    pub anthropic_max_tokens: Option<u32>,

    /// Send the default persona when a conversation has no system message.
    #[arrrg(flag, "Send a default persona to Anthropic models without a system message")]
    pub default_persona: bool,
}

/// Resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on.
    pub bind: String,

    /// OpenAI base URL.
    pub openai_url: String,

    /// Anthropic base URL.
    pub anthropic_url: String,

    /// Hyperbolic base URL.
    pub hyperbolic_url: String,

    /// Upstream connect timeout.
    pub connect_timeout: Duration,

    /// Longest gap allowed between chunks of an upstream stream.
    pub idle_timeout: Duration,

    /// `max_tokens` for Anthropic requests.
    pub anthropic_max_tokens: u32,

    /// System preamble policy for the Anthropic adapter.
    pub preamble: SystemPreamble,

    /// OpenAI credential.
    pub openai_api_key: Option<String>,

    /// Anthropic credential.
    pub anthropic_api_key: Option<String>,

    /// Hyperbolic credential.
    pub hyperbolic_api_key: Option<String>,

    /// Credentials required of relay clients.  `None` leaves the endpoint open.
    pub auth: Option<BasicAuth>,
}

impl RelayConfig {
    /// Creates a configuration with default endpoints and no credentials.
    pub fn new() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            openai_url: OPENAI_API_URL.to_string(),
            anthropic_url: ANTHROPIC_API_URL.to_string(),
            hyperbolic_url: HYPERBOLIC_API_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            anthropic_max_tokens: DEFAULT_MAX_TOKENS,
            preamble: SystemPreamble::Off,
            openai_api_key: None,
            anthropic_api_key: None,
            hyperbolic_api_key: None,
            auth: None,
        }
    }

    /// Fill credentials from `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `HYPERBOLIC_API_KEY`,
    /// `AUTH_USERNAME` and `AUTH_PASSWORD`.
    pub fn with_env_credentials(mut self) -> Self {
        self.openai_api_key = non_empty_env("OPENAI_API_KEY");
        self.anthropic_api_key = non_empty_env("ANTHROPIC_API_KEY");
        self.hyperbolic_api_key = non_empty_env("HYPERBOLIC_API_KEY");
        self.auth = BasicAuth::from_env();
        self
    }

    /// Sets the listen address.
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Sets the Anthropic preamble policy.
    pub fn with_preamble(mut self, preamble: SystemPreamble) -> Self {
        self.preamble = preamble;
        self
    }

    /// Sets the OpenAI credential.
    pub fn with_openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Sets the Anthropic credential.
    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Sets the Hyperbolic credential.
    pub fn with_hyperbolic_api_key(mut self, key: impl Into<String>) -> Self {
        self.hyperbolic_api_key = Some(key.into());
        self
    }

    /// Requires clients to present these credentials.
    pub fn with_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Parse the listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| Error::configuration(format!("invalid bind address {}: {e}", self.bind)))
    }

    /// Build an adapter for every provider that has a credential.
    pub fn providers(&self) -> Result<Providers> {
        let timeout = Some(self.connect_timeout);
        let mut providers = Providers::new();
        if let Some(key) = &self.openai_api_key {
            let adapter = OpenAiAdapter::new(
                &self.openai_url,
                key.clone(),
                DecodingParams::provider_defaults(),
                timeout,
            )?;
            providers = providers.with(ProviderKind::OpenAi, Provider::OpenAi(adapter));
        }
        if let Some(key) = &self.hyperbolic_api_key {
            let adapter = OpenAiAdapter::new(
                &self.hyperbolic_url,
                key.clone(),
                DecodingParams::hyperbolic(),
                timeout,
            )?;
            providers = providers.with(ProviderKind::Hyperbolic, Provider::OpenAi(adapter));
        }
        if let Some(key) = &self.anthropic_api_key {
            let adapter =
                AnthropicAdapter::with_options(key.clone(), Some(&self.anthropic_url), timeout)?
                    .with_preamble(self.preamble.clone())
                    .with_max_tokens(self.anthropic_max_tokens);
            providers = providers.with(ProviderKind::Anthropic, Provider::Anthropic(adapter));
        }
        Ok(providers)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<RelayArgs> for RelayConfig {
    fn from(args: RelayArgs) -> Self {
        let defaults = RelayConfig::new();
        RelayConfig {
            bind: args.bind.unwrap_or(defaults.bind),
            openai_url: args.openai_url.unwrap_or(defaults.openai_url),
            anthropic_url: args.anthropic_url.unwrap_or(defaults.anthropic_url),
            hyperbolic_url: args.hyperbolic_url.unwrap_or(defaults.hyperbolic_url),
            connect_timeout: args
                .connect_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            idle_timeout: args
                .idle_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            anthropic_max_tokens: args
                .anthropic_max_tokens
                .unwrap_or(defaults.anthropic_max_tokens),
            preamble: if args.default_persona {
                SystemPreamble::default_persona()
            } else {
                SystemPreamble::Off
            },
            ..defaults
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RelayConfig::new();
        assert_eq!(config.bind, "127.0.0.1:3000");
        assert_eq!(config.preamble, SystemPreamble::Off);
        assert!(config.auth.is_none());
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert!(config.socket_addr().is_ok());
    }

    #[test]
    fn config_from_args() {
        let args = RelayArgs {
            bind: Some("0.0.0.0:8080".to_string()),
            connect_timeout: Some(5),
            idle_timeout: Some(90),
            anthropic_max_tokens: Some(4096),
            default_persona: true,
            ..RelayArgs::default()
        };
        let config = RelayConfig::from(args);
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.anthropic_max_tokens, 4096);
        assert_eq!(config.preamble, SystemPreamble::default_persona());
        assert_eq!(config.openai_url, OPENAI_API_URL);
    }

    #[test]
    fn only_configured_providers_are_built() {
        let providers = RelayConfig::new()
            .with_anthropic_api_key("key")
            .providers()
            .unwrap();
        assert!(providers.get(ProviderKind::Anthropic).is_some());
        assert!(providers.get(ProviderKind::OpenAi).is_none());
        assert!(providers.get(ProviderKind::Hyperbolic).is_none());
    }

    #[test]
    fn anthropic_adapter_gets_configured_max_tokens() {
        let mut config = RelayConfig::new().with_anthropic_api_key("key");
        config.anthropic_max_tokens = 4096;
        let providers = config.providers().unwrap();
        match providers.get(ProviderKind::Anthropic) {
            Some(Provider::Anthropic(adapter)) => {
                let request = adapter.request("claude-3-opus-20240229", &[]);
                assert_eq!(request.max_tokens, 4096);
            }
            _ => panic!("anthropic adapter not built"),
        }
    }

    #[test]
    fn bad_bind_is_a_configuration_error() {
        let config = RelayConfig::new().with_bind("not an address");
        assert!(matches!(
            config.socket_addr(),
            Err(Error::Configuration { .. })
        ));
    }
}
