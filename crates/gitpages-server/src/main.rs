mod error;
mod handlers;
mod routes;
mod state;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "git-pages", version)]
#[command(about = "Multi-tenant static-site hosting server")]
struct Cli {
    /// Path to the server's TOML config file.
    #[arg(long, default_value = "git-pages.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = gitpages_config::load_config_from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let addr = config.listen.addr.clone();

    let state = AppState::build(config).await.context("building server state")?;
    let app = routes::build(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding listener on {addr}"))?;
    tracing::info!(%addr, "git-pages listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server loop failed")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
