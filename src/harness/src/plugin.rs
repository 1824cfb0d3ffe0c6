use crate::descriptor::{AppInfo, PluginDescriptor};
use crate::error::Result;
use async_trait::async_trait;
use router_config::ConfigSection;
use tokio::sync::watch;

/// A loaded plugin: an ABI descriptor plus the three optional lifecycle
/// callbacks (`init`, `deinit`, `start`). All three default to no-ops, so
/// a plugin only needs to override the ones it uses — matching "optional
/// `init`, `deinit`, `start` callbacks" in the descriptor model.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    async fn init(&self, _app_info: &AppInfo) -> Result<()> {
        Ok(())
    }

    async fn deinit(&self, _app_info: &AppInfo) -> Result<()> {
        Ok(())
    }

    /// Whether this plugin's `start` should be run as a worker. Plugins
    /// without a meaningful `start` (e.g. the `logger` stand-in) leave
    /// this `false` so the harness does not spawn an idle worker.
    fn has_start(&self) -> bool {
        false
    }

    async fn start(&self, _section: &ConfigSection, _stop: watch::Receiver<bool>) -> Result<()> {
        Ok(())
    }
}

/// A `start`-less plugin purely so other plugins can declare a dependency
/// on `"logger"` per the harness's control-flow summary — logging itself
/// is handled ambiently by the global `tracing` subscriber (see
/// `SPEC_FULL.md` §10.1).
pub struct LoggerPlugin {
    descriptor: PluginDescriptor,
}

impl LoggerPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor {
                abi_version: crate::descriptor::ABI_VERSION,
                name: "logger",
                brief: "levelled logging sink, provided ambiently by tracing",
                plugin_version: router_config::Version::new(1, 0, 0),
                requires: Vec::new(),
                conflicts: Vec::new(),
            },
        }
    }
}

impl Default for LoggerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for LoggerPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}
