//! Tracks InnoDB Cluster / group-replication topology and exposes it to
//! the routing dataplane as a process-wide named registry of caches.

mod cache;
mod error;
mod plugin;
mod types;

pub use cache::{BootstrapAddress, Credentials, MetadataCache};
pub use error::{Error, Result};
pub use plugin::{lookup_cache, MetadataCachePlugin};
pub use types::{
    derive_mode, derive_status, InstanceStatus, ManagedInstance, ManagedReplicaSet,
    ReplicasetStatus, Role, ServerMode,
};
