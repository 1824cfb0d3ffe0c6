//! Configuration model for the router harness: `Config`/`ConfigSection`
//! (mapping, interpolation, merge semantics) and the `Designator`/`Version`
//! plugin-dependency expressions that sit alongside it.
//!
//! The INI-file reader in [`ini`] is the one out-of-scope "external
//! collaborator" this crate still has to provide something for — it is
//! kept to a minimal tokenizer that produces `Config` values; all of the
//! actual semantics (interpolation, merge, validation) live in
//! [`Config`]/[`ConfigSection`].

pub mod config;
pub mod designator;
pub mod error;
pub mod ini;
pub mod section;
pub mod version;

pub use config::Config;
pub use designator::{Designator, Relation};
pub use error::{Error, Result};
pub use section::ConfigSection;
pub use version::Version;
