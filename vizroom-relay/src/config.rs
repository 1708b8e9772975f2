//! Relay configuration: JSON file first, then command-line overrides.

use std::path::{Path, PathBuf};

use thiserror::Error;
use vizroom_collab::ServerConfig;

use crate::Args;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_file(path: &Path) -> Result<ServerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the effective config. Flags win over file values.
pub fn resolve(args: &Args) -> Result<ServerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = &args.ws_bind {
        config.ws_bind_addr = addr.clone();
    }
    if let Some(addr) = &args.http_bind {
        config.http_bind_addr = addr.clone();
    }
    if let Some(max) = args.max_participants {
        config.max_participants_per_room = max;
    }
    if let Some(ttl) = args.ticket_ttl_secs {
        config.ticket_ttl_secs = ttl;
    }
    if let Some(ttl) = args.room_idle_ttl_secs {
        config.room_idle_ttl_secs = ttl;
    }
    config.multi_highlight |= args.multi_highlight;
    config.require_auth |= args.require_auth;
    Ok(config)
}
