use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("uri error: {0}")]
    Uri(String),

    #[error("routing config error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Harness(#[from] router_harness::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
