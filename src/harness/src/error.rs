use thiserror::Error;

/// Errors raised while loading plugins or driving their lifecycle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad plugin: {0}")]
    BadPlugin(String),

    #[error("logic error: {0}")]
    Logic(String),

    #[error(transparent)]
    Config(#[from] router_config::Error),

    #[error("plugin '{0}' init failed: {1}")]
    InitFailed(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;
