use crate::cache::{BootstrapAddress, Credentials, MetadataCache};
use crate::error::{Error, Result};
use async_trait::async_trait;
use router_config::ConfigSection;
use router_harness::{AppInfo, PluginDescriptor, Plugin};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Process-wide registry keyed by cache name: construction installs,
/// teardown removes (§9 design notes). Destination objects in `routing`
/// look a cache up by name rather than holding a direct reference.
static REGISTRY: OnceLock<parking_lot::Mutex<HashMap<String, Arc<MetadataCache>>>> = OnceLock::new();

fn registry() -> &'static parking_lot::Mutex<HashMap<String, Arc<MetadataCache>>> {
    REGISTRY.get_or_init(|| parking_lot::Mutex::new(HashMap::new()))
}

/// Looks up a previously-installed cache by name, for use by routing
/// destinations.
pub fn lookup_cache(name: &str) -> Option<Arc<MetadataCache>> {
    registry().lock().get(name).cloned()
}

fn install_cache(name: String, cache: Arc<MetadataCache>) {
    registry().lock().insert(name, cache);
}

fn remove_cache(name: &str) {
    registry().lock().remove(name);
}

pub struct MetadataCachePlugin {
    descriptor: PluginDescriptor,
}

impl MetadataCachePlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor {
                abi_version: router_harness::ABI_VERSION,
                name: "metadata_cache",
                brief: "tracks InnoDB Cluster / group-replication topology",
                plugin_version: router_config::Version::new(1, 0, 0),
                requires: vec![router_config::Designator::parse("logger").unwrap()],
                conflicts: Vec::new(),
            },
        }
    }
}

impl Default for MetadataCachePlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_section(key: &str, section: &ConfigSection) -> Result<(Vec<BootstrapAddress>, Credentials, Duration, String)> {
    if section.has("password") {
        return Err(Error::Config(format!(
            "[metadata_cache:{key}] option 'password' is not permitted in the config file"
        )));
    }
    let user = section
        .get("user", None)
        .map_err(|_| Error::Config(format!("[metadata_cache:{key}] option 'user' is required")))?;

    let addrs_raw = section
        .get("bootstrap_server_addresses", None)
        .map_err(|_| Error::Config(format!("[metadata_cache:{key}] option 'bootstrap_server_addresses' is required")))?;
    let mut addresses = Vec::new();
    for part in addrs_raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        addresses.push(BootstrapAddress::parse(part).map_err(|e| Error::Config(e.to_string()))?);
    }
    if addresses.is_empty() {
        return Err(Error::Config(format!(
            "[metadata_cache:{key}] option 'bootstrap_server_addresses' must name at least one address"
        )));
    }

    let ttl = match section.get("ttl", None) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| Error::Config(format!("[metadata_cache:{key}] option 'ttl' must be an integer")))?;
            if secs == 0 || secs > u32::MAX as u64 {
                return Err(Error::Config(format!(
                    "[metadata_cache:{key}] option 'ttl' must satisfy 0 < ttl <= {}",
                    u32::MAX
                )));
            }
            Duration::from_secs(secs)
        }
        Err(_) => Duration::from_secs(300),
    };

    let cluster_name = section.get("metadata_cluster", None).unwrap_or_default();

    Ok((addresses, Credentials { user, password: String::new() }, ttl, cluster_name))
}

#[async_trait]
impl Plugin for MetadataCachePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn has_start(&self) -> bool {
        true
    }

    async fn start(&self, section: &ConfigSection, mut stop: watch::Receiver<bool>) -> router_harness::Result<()> {
        let (addresses, mut credentials, ttl, cluster_name) = parse_section(&section.key, section)
            .map_err(|e| router_harness::Error::InitFailed("metadata_cache".to_string(), e.to_string()))?;

        let key = section.key.clone();
        credentials.password = tokio::task::spawn_blocking(move || prompt_password(&key))
            .await
            .map_err(|e| router_harness::Error::InitFailed("metadata_cache".to_string(), e.to_string()))?;

        info!(
            "router_metadata_cache: starting cache '{}' ({} bootstrap server(s), ttl={:?})",
            section.key,
            addresses.len(),
            ttl
        );
        let cache = Arc::new(MetadataCache::new(addresses, credentials, ttl, cluster_name).await);
        install_cache(section.key.clone(), cache.clone());

        let run_result = tokio::select! {
            _ = cache.clone().run(stop.clone()) => Ok(()),
            _ = stop.changed() => Ok(()),
        };

        remove_cache(&section.key);
        run_result
    }

    async fn init(&self, _app_info: &AppInfo) -> router_harness::Result<()> {
        Ok(())
    }
}

/// `password` is forbidden in the config file, so it is always prompted
/// for interactively at startup, once per configured cache.
fn prompt_password(cache_key: &str) -> String {
    use std::io::Write;
    eprint!("Enter password for metadata_cache '{cache_key}': ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok();
    line.trim_end_matches(['\n', '\r']).to_string()
}
