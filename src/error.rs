use crate::record::ClientId;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PimonError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("socket error: {0}")]
    Socket(io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
    #[error("evaluate interval ({interval}s) must be shorter than the offline threshold ({threshold}s)")]
    EvaluateInterval { interval: u64, threshold: u64 },
    #[error("cannot read config file {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// No free slot for an unknown client while the registry drops on full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("registry full, dropping {client_id}")]
pub struct RegistryFull {
    pub client_id: ClientId,
}

pub type Result<T, E = PimonError> = std::result::Result<T, E>;
