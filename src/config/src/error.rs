use thiserror::Error;

/// Error kinds raised while building or reading a [`crate::Config`].
///
/// These mirror the distinct error classes named in the harness design:
/// a malformed file is a [`Error::Syntax`] error, a section-shaped problem
/// (missing/duplicate/disallowed key) is [`Error::BadSection`], and an
/// option-shaped problem (unknown/duplicate option, bad value) is
/// [`Error::BadOption`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("bad section: {0}")]
    BadSection(String),

    #[error("bad option: {0}")]
    BadOption(String),
}

pub type Result<T> = std::result::Result<T, Error>;
