//! Dashboard server - web interface for monitoring and controlling runs.
//!
//! Read-mostly: every view is derived from the persisted run state and
//! result artifacts. The only writes are control commands (pause, resume,
//! stop) into the control-signal file, which the run driver polls at cell
//! boundaries.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "dashboard")]
#[command(about = "Web dashboard for monitoring and controlling harness runs")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Harness results directory (contains run_state.json)
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Behavior taxonomy CSV; enables pending behaviors in listings
    #[arg(long)]
    taxonomy: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dashboard=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let results_dir = args.results_dir.canonicalize().unwrap_or(args.results_dir);
    info!(results_dir = %results_dir.display(), "starting dashboard");

    let state = AppState::new(results_dir, args.taxonomy);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
