//! VizRoom relay: WebSocket room sync plus the lobby REST API.

mod config;

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use vizroom_collab::SyncServer;

/// Collaborative room relay
#[derive(Parser, Debug)]
#[command(name = "vizroom-relay")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// JSON config file
    #[arg(short, long, env = "VIZROOM_CONFIG")]
    pub config: Option<PathBuf>,

    /// WebSocket listen address
    #[arg(long)]
    pub ws_bind: Option<String>,

    /// Lobby API listen address
    #[arg(long)]
    pub http_bind: Option<String>,

    /// Participants allowed per room
    #[arg(long)]
    pub max_participants: Option<usize>,

    /// Lobby ticket lifetime
    #[arg(long)]
    pub ticket_ttl_secs: Option<u64>,

    /// Remove rooms still empty this many seconds after creation
    #[arg(long)]
    pub room_idle_ttl_secs: Option<u64>,

    /// Let several participants highlight the same entity
    #[arg(long)]
    pub multi_highlight: bool,

    /// Require a bearer token on lobby requests
    #[arg(long)]
    pub require_auth: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    info!(
        "Starting VizRoom relay (sync {}, lobby {})",
        config.ws_bind_addr, config.http_bind_addr
    );
    let server = SyncServer::new(config);
    if let Err(e) = server.run().await {
        error!("Relay stopped: {e}");
        std::process::exit(1);
    }
}
