//! The relay server: one authenticated endpoint fronting every configured provider.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default address with credentials from the environment
//! OPENAI_API_KEY=... ANTHROPIC_API_KEY=... AUTH_USERNAME=alice AUTH_PASSWORD=s3cret \
//!     relaychat-server
//!
//! # Listen elsewhere and send a persona to Anthropic models
//! relaychat-server --bind 0.0.0.0:8080 --default-persona
//! ```
//!
//! Provider credentials are read from `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and
//! `HYPERBOLIC_API_KEY`.  A provider without a key is not configured and requests for its models
//! are answered with 503.

use std::sync::Arc;

use arrrg::CommandLine;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relaychat::relay::{RELAY_PATH, RelayArgs, RelayConfig, RelayState, router};
use relaychat::{MODEL_DEFS, Providers};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (args, _) = RelayArgs::from_command_line_relaxed("relaychat-server [OPTIONS]");
    let config = RelayConfig::from(args).with_env_credentials();
    let addr = config.socket_addr()?;

    let providers = config.providers()?;
    log_configured_models(&providers);
    if config.auth.is_none() {
        warn!("AUTH_USERNAME/AUTH_PASSWORD not set; the relay accepts unauthenticated requests");
    }

    let state = RelayState::new(Arc::new(providers), config.auth.clone())
        .with_idle_timeout(config.idle_timeout);
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, path = RELAY_PATH, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

fn log_configured_models(providers: &Providers) {
    for def in MODEL_DEFS {
        if providers.get(def.provider).is_some() {
            info!(model = def.api_name, provider = %def.provider, "serving model");
        } else {
            warn!(model = def.api_name, provider = %def.provider, "provider not configured");
        }
    }
}
