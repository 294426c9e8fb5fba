//! Refiner server - streams test-generation sessions over HTTP.

mod routes;
mod state;
mod stream;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use refiner::dispatch::Dispatcher;
use refiner::io::config::load_config;
use refiner::pipeline::Pipeline;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "refiner-server")]
#[command(about = "Generate, run and refine unit tests over a streaming HTTP API")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Configuration file; built-in defaults are used when it is missing
    #[arg(long, default_value = "refiner.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    refiner::logging::init("info");

    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    info!(
        config = %args.config.display(),
        models = ?config.models,
        max_round = config.max_round,
        junit_version = config.default_junit_version,
        "starting refiner-server"
    );

    let pipeline = Pipeline::from_config(&config)?;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(pipeline),
        config.default_junit_version,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = routes::router(AppState::new(dispatcher)).layer(cors);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
