use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("metadata cache config error: {0}")]
    Config(String),

    #[error("metadata refresh failed: {0}")]
    Metadata(String),

    #[error(transparent)]
    Harness(#[from] router_harness::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
