//! HTTP server binary for pdf2md-batch.
//!
//! Builds one [`Converter`] at startup (provider resolved once, shared by
//! every request) and serves the routes from [`pdf2md_batch::server`].

use anyhow::{Context, Result};
use clap::Parser;
use pdf2md_batch::cli::{init_tracing, BatchArgs};
use pdf2md_batch::server::{create_routes, AppState};
use pdf2md_batch::{ConcurrencyLimiter, Converter, LimiterScope};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve PDF-to-Markdown transcription over HTTP.
#[derive(Parser, Debug)]
#[command(name = "pdf2md-server", version)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "PDF2MD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PDF2MD_PORT", default_value_t = 8000)]
    port: u16,

    /// Apply --max-concurrency across all requests instead of per request.
    #[arg(long, env = "PDF2MD_SHARED_CONCURRENCY")]
    shared_concurrency: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, false);

    let config = args.batch.to_config(None).await?;
    let max_concurrency = config.max_concurrency;
    let mut converter =
        Converter::from_config(config).context("Failed to configure the transcription client")?;
    if args.shared_concurrency {
        converter = converter.with_limiter(LimiterScope::Shared(Arc::new(
            ConcurrencyLimiter::new(max_concurrency),
        )));
    }

    let app = create_routes(AppState::new(converter));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        addr = %addr,
        max_concurrency,
        shared = args.shared_concurrency,
        "pdf2md-server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
