//! Configuration types for the terminal client.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved configuration used to
//! connect to a relay and locate the conversation store.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::error::Result;
use crate::relay::{DEFAULT_RELAY_URL, RelayClient};
use crate::store::FileStore;

/// Default directory holding the persisted conversation.
pub const DEFAULT_STORE_DIR: &str = ".relaychat";

/// Command-line arguments for the relaychat client.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ClientArgs {
    /// Relay endpoint.
    #[arrrg(optional, "Relay endpoint (default: http://127.0.0.1:3000/api/message)", "URL")]
    pub relay_url: Option<String>,

    /// Username for the relay's Basic authentication.
    #[arrrg(optional, "Relay username (default: $AUTH_USERNAME)", "USER")]
    pub username: Option<String>,

    /// Password for the relay's Basic authentication.
    #[arrrg(optional, "Relay password (default: $AUTH_PASSWORD)", "PASS")]
    pub password: Option<String>,

    /// Directory holding the persisted conversation.
    #[arrrg(optional, "Conversation store directory (default: .relaychat)", "DIR")]
    pub store_dir: Option<String>,

    /// Model to select on startup.
    #[arrrg(optional, "Model to select, overriding the saved preference", "MODEL")]
    pub model: Option<String>,
}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// The relay endpoint.
    pub relay_url: String,

    /// Basic credentials presented to the relay.
    pub credentials: Option<(String, String)>,

    /// Directory holding the persisted conversation.
    pub store_dir: PathBuf,

    /// Model selected on startup; `None` keeps the saved preference.
    pub model: Option<String>,
}

impl ClientConfig {
    /// Creates a configuration pointing at a local relay.
    pub fn new() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            credentials: None,
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            model: None,
        }
    }

    /// Sets the relay endpoint.
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Sets the Basic credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the store directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    /// Sets the startup model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Build a relay client for this configuration.
    pub fn relay_client(&self) -> Result<RelayClient> {
        let client = RelayClient::new(&self.relay_url)?;
        Ok(match &self.credentials {
            Some((username, password)) => client.with_basic_auth(username, password),
            None => client,
        })
    }

    /// Open the conversation store.
    pub fn store(&self) -> Result<FileStore> {
        FileStore::open(&self.store_dir)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        let username = args.username.or_else(|| std::env::var("AUTH_USERNAME").ok());
        let password = args.password.or_else(|| std::env::var("AUTH_PASSWORD").ok());
        let defaults = ClientConfig::new();
        ClientConfig {
            relay_url: args.relay_url.unwrap_or(defaults.relay_url),
            credentials: username.zip(password),
            store_dir: args
                .store_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            model: args.model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::new();
        assert_eq!(config.relay_url, "http://127.0.0.1:3000/api/message");
        assert_eq!(config.store_dir, PathBuf::from(".relaychat"));
        assert!(config.credentials.is_none());
        assert!(config.model.is_none());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ClientArgs {
            relay_url: Some("http://relay.example:8080/api/message".to_string()),
            username: Some("alice".to_string()),
            password: Some("s3cret".to_string()),
            store_dir: Some("/tmp/chat".to_string()),
            model: Some("claude-3-opus-20240229".to_string()),
        };
        let config = ClientConfig::from(args);
        assert_eq!(config.relay_url, "http://relay.example:8080/api/message");
        assert_eq!(
            config.credentials,
            Some(("alice".to_string(), "s3cret".to_string()))
        );
        assert_eq!(config.store_dir, PathBuf::from("/tmp/chat"));
        assert_eq!(config.model.as_deref(), Some("claude-3-opus-20240229"));
    }

    #[test]
    fn config_builder_pattern() {
        let config = ClientConfig::new()
            .with_relay_url("http://localhost:4000/api/message")
            .with_credentials("bob", "hunter2")
            .with_store_dir("state")
            .with_model("gpt-4o-2024-05-13");
        assert_eq!(config.relay_url, "http://localhost:4000/api/message");
        assert_eq!(
            config.credentials,
            Some(("bob".to_string(), "hunter2".to_string()))
        );
        assert_eq!(config.store_dir, PathBuf::from("state"));
        assert_eq!(config.model.as_deref(), Some("gpt-4o-2024-05-13"));
        let client = config.relay_client().unwrap();
        assert_eq!(client.url().port(), Some(4000));
    }

    #[test]
    fn invalid_relay_url_is_rejected() {
        let config = ClientConfig::new().with_relay_url("not a url");
        assert!(config.relay_client().is_err());
    }
}
