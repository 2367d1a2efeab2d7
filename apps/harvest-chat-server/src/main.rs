#![forbid(unsafe_code)]

use std::net::SocketAddr;

use harvest_chat_server::{build_router, init_tracing, AppConfig, Environment};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let environment = match std::env::var("HARVEST_ENVIRONMENT") {
        Ok(value) => value
            .parse::<Environment>()
            .map_err(|e| anyhow::anyhow!("invalid HARVEST_ENVIRONMENT: {e}"))?,
        Err(_) => Environment::Production,
    };
    let token_secret = std::env::var("HARVEST_TOKEN_SECRET").ok();
    let database_url = std::env::var("HARVEST_DATABASE_URL").ok();
    if database_url.is_none() {
        tracing::warn!(
            event = "startup.store",
            "HARVEST_DATABASE_URL is not set; chat state lives in memory only"
        );
    }
    let allowed_origins = std::env::var("HARVEST_ALLOWED_ORIGINS")
        .map(|value| {
            value
                .split(',')
                .map(|origin| origin.trim().to_owned())
                .filter(|origin| !origin.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let app_config = AppConfig {
        environment,
        token_secret,
        database_url,
        allowed_origins,
        ..AppConfig::default()
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("HARVEST_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid HARVEST_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "harvest-chat-server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
