use thiserror::Error;

/// Errors that can occur in the router
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("listener has been closed")]
    Closed,

    #[error("route not found")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("No private key found in key material")]
    NoPrivateKey,

    #[error("store error: {0}")]
    Store(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
