//! Upstream stand-in for local and contract testing

use anyhow::Result;
use llm_meter::{application::shutdown_signal, config::normalize_listen_addr, logging, mock_upstream};
use tokio::net::TcpListener;
use tracing::info;

const LISTEN_ADDR: &str = ":8080";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(logging::LogFormat::default());

    let listener = TcpListener::bind(normalize_listen_addr(LISTEN_ADDR)).await?;
    info!(listen_addr = %listener.local_addr()?, "mock-openai listening");

    axum::serve(listener, mock_upstream::router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
