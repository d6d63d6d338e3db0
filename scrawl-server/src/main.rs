//! Standalone board synchronization server.
//!
//! Configuration comes from the environment:
//! - `SCRAWL_BIND` — listen address (default `127.0.0.1:9090`)
//! - `SCRAWL_SECRET` — shared secret for HMAC token validation; when
//!   unset, the server accepts the static dev token `dev`.

use std::sync::Arc;

use log::info;
use scrawl_collab::auth::{AuthConfig, HmacTokenValidator, IdentityProvider, StaticTokenValidator};
use scrawl_collab::server::{BoardServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting Scrawl board server...");

    let config = ServerConfig {
        bind_addr: std::env::var("SCRAWL_BIND")
            .unwrap_or_else(|_| ServerConfig::default().bind_addr),
        ..ServerConfig::default()
    };

    let auth: Arc<dyn IdentityProvider> = match std::env::var("SCRAWL_SECRET") {
        Ok(secret) => Arc::new(HmacTokenValidator::new(AuthConfig::new(secret.into_bytes()))),
        Err(_) => {
            log::warn!("SCRAWL_SECRET not set, accepting the static dev token \"dev\"");
            Arc::new(StaticTokenValidator::new(b"dev".to_vec()))
        }
    };

    let server = BoardServer::new(config, auth);
    if let Err(e) = server.run().await {
        log::error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
