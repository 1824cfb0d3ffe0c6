use crate::descriptor::AppInfo;
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use router_config::Config;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const HARNESS_ABI: u16 = crate::descriptor::ABI_VERSION;

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    Ongoing,
    Visited,
}

/// Owns the `Config`, loads plugins on demand by name, topologically
/// orders them by required-plugin edges, drives their lifecycle, and owns
/// the per-plugin worker tasks.
///
/// Plugins are not `dlopen`'d: they are statically linked into the binary
/// and handed to [`Harness::register`] before [`Harness::load_all`] runs,
/// per the "statically-linked plugins registered at startup via a
/// registry table" alternative named in the design notes. The descriptor
/// stays the same plain data record either way.
pub struct Harness {
    app_info: AppInfo,
    registry: HashMap<String, Arc<dyn Plugin>>,
    loaded: HashMap<String, Arc<dyn Plugin>>,
    stop_tx: watch::Sender<bool>,
}

impl Harness {
    pub fn new(app_info: AppInfo) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            app_info,
            registry: HashMap::new(),
            loaded: HashMap::new(),
            stop_tx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.app_info.config
    }

    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    /// Makes a statically-linked plugin available to be `load`ed under
    /// its own descriptor name (the "library name" the config may also
    /// reference explicitly via a section's `library` option).
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.descriptor().name.to_string();
        self.registry.insert(name, plugin);
    }

    /// Fill-and-check pass: every section without a `library` option gets
    /// one set to its section name; all sections sharing a name must
    /// resolve to the same library.
    pub fn fill_and_check(&mut self) -> Result<()> {
        let mut library_by_name: HashMap<String, String> = HashMap::new();
        for section in self.app_info.config.iter_mut() {
            if !section.has("library") {
                let name = section.name.clone();
                section.set("library", &name)?;
            }
        }
        for ((name, key), section) in self.app_info.config.iter() {
            let library = section.get("library", Some(self.app_info.config.defaults())).unwrap_or_default();
            match library_by_name.get(name) {
                Some(existing) if existing != &library => {
                    return Err(Error::Config(router_config::Error::BadSection(format!(
                        "sections named '{name}' resolve to different libraries: '{existing}' (seen earlier) vs '{library}' (at key '{key}')"
                    ))));
                }
                _ => {
                    library_by_name.insert(name.clone(), library);
                }
            }
        }
        Ok(())
    }

    /// Loads the plugin registered under `library` (the section's
    /// `library` option, defaulting to `plugin_name`), resolving and
    /// loading its required designators recursively. Idempotent: loading
    /// an already-loaded plugin name is a no-op.
    pub fn load(&mut self, plugin_name: &str, key: Option<&str>) -> Result<()> {
        if self.loaded.contains_key(plugin_name) {
            return Ok(());
        }

        let sections: Vec<_> = match key {
            Some(k) => self
                .app_info
                .config
                .section(plugin_name, k)
                .into_iter()
                .collect(),
            None => self.app_info.config.sections_named(plugin_name).collect(),
        };
        if key.is_none() && sections.len() != 1 {
            return Err(Error::BadPlugin(format!(
                "load('{plugin_name}') without a key requires exactly one configured section, found {}",
                sections.len()
            )));
        }
        let library = sections
            .first()
            .map(|s| {
                s.get("library", Some(self.app_info.config.defaults()))
                    .unwrap_or_else(|_| plugin_name.to_string())
            })
            .unwrap_or_else(|| plugin_name.to_string());

        let plugin = self
            .registry
            .get(&library)
            .cloned()
            .ok_or_else(|| Error::BadPlugin(format!("no such plugin library '{library}'")))?;

        if !plugin.descriptor().abi_compatible_with(HARNESS_ABI) {
            return Err(Error::BadPlugin(format!(
                "plugin '{library}' has incompatible ABI version {:#06x}",
                plugin.descriptor().abi_version
            )));
        }

        self.loaded.insert(plugin_name.to_string(), plugin.clone());

        for designator in &plugin.descriptor().requires {
            self.load(&designator.plugin, None)?;
            let required = self.loaded.get(&designator.plugin).ok_or_else(|| {
                Error::BadPlugin(format!("dependency '{}' failed to load", designator.plugin))
            })?;
            if !designator.version_good(required.descriptor().plugin_version) {
                return Err(Error::BadPlugin(format!(
                    "plugin '{plugin_name}' requires {designator} but loaded version is {}",
                    required.descriptor().plugin_version
                )));
            }
        }
        Ok(())
    }

    /// Loads every configured section's plugin (§4.3 phase 1).
    pub fn load_all(&mut self) -> Result<()> {
        self.fill_and_check()?;
        let names: Vec<String> = self
            .app_info
            .config
            .iter()
            .map(|((name, _), _)| name.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for name in names {
            self.load(&name, None).or_else(|_| {
                // a plugin configured under more than one key can't use
                // the keyless `load`; load each key explicitly instead.
                let keys: Vec<String> = self
                    .app_info
                    .config
                    .sections_named(&name)
                    .map(|s| s.key.clone())
                    .collect();
                for k in keys {
                    self.load(&name, Some(&k))?;
                }
                Ok::<(), Error>(())
            })?;
        }
        Ok(())
    }

    /// Depth-first walk over the loaded-plugin map producing an
    /// init-order list: a plugin's dependencies appear before it.
    fn topo_order(&self) -> Result<Vec<String>> {
        let mut state: HashMap<&str, VisitState> = self
            .loaded
            .keys()
            .map(|k| (k.as_str(), VisitState::Unvisited))
            .collect();
        let mut order = Vec::with_capacity(self.loaded.len());

        fn visit<'a>(
            name: &'a str,
            loaded: &'a HashMap<String, Arc<dyn Plugin>>,
            state: &mut HashMap<&'a str, VisitState>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            match state.get(name) {
                Some(VisitState::Visited) => return Ok(()),
                Some(VisitState::Ongoing) => {
                    return Err(Error::Logic(format!(
                        "cycle detected in plugin dependency graph at '{name}'"
                    )))
                }
                _ => {}
            }
            state.insert(name, VisitState::Ongoing);
            if let Some(plugin) = loaded.get(name) {
                for designator in &plugin.descriptor().requires {
                    visit(&designator.plugin, loaded, state, order)?;
                }
            }
            state.insert(name, VisitState::Visited);
            order.push(name.to_string());
            Ok(())
        }

        let mut names: Vec<&str> = self.loaded.keys().map(String::as_str).collect();
        names.sort_unstable();
        for name in names {
            visit(name, &self.loaded, &mut state, &mut order)?;
        }
        Ok(order)
    }

    /// Phase 2: `init` in dependency order. A non-zero/error return aborts
    /// startup; already-initialized plugins are not rolled back here.
    pub async fn init_all(&self) -> Result<()> {
        let order = self.topo_order()?;
        for name in &order {
            let plugin = self.loaded.get(name).expect("in topo order");
            debug!("router_harness: init '{name}'");
            plugin.init(&self.app_info).await.map_err(|e| {
                Error::InitFailed(name.clone(), e.to_string())
            })?;
        }
        Ok(())
    }

    /// Phase 3: spawn one worker per section whose plugin has a `start`.
    pub fn start_all(&self) -> Vec<(String, JoinHandle<()>)> {
        let mut handles = Vec::new();
        for ((name, key), section) in self.app_info.config.iter() {
            let Some(plugin) = self.loaded.get(name).cloned() else {
                continue;
            };
            if !plugin.has_start() {
                continue;
            }
            // flatten defaults into the section so a worker's `start` can
            // resolve options without needing the rest of the Config.
            let mut section = section.clone();
            let mut flattened = self.app_info.config.defaults().clone();
            flattened.merge_from(&section);
            flattened.name = section.name.clone();
            flattened.key = section.key.clone();
            section = flattened;
            let stop_rx = self.stop_tx.subscribe();
            let label = if key.is_empty() {
                name.clone()
            } else {
                format!("{name}:{key}")
            };
            info!("router_harness: starting worker for [{label}]");
            let handle = tokio::spawn(async move {
                if let Err(e) = plugin.start(&section, stop_rx).await {
                    error!("router_harness: worker [{label}] exited with error: {e}");
                }
            });
            handles.push((label, handle));
        }
        handles
    }

    /// Signals every running worker to stop (closes listening sockets,
    /// etc.) — the routing/metadata_cache workers observe this flag.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Phase 4: wait for every worker to exit.
    pub async fn join_all(handles: Vec<(String, JoinHandle<()>)>) {
        for (label, handle) in handles {
            if let Err(e) = handle.await {
                warn!("router_harness: worker [{label}] panicked: {e}");
            }
        }
    }

    /// Phase 5: `deinit` in reverse of init order; errors are logged, never
    /// short-circuit the phase.
    pub async fn deinit_all(&self) {
        let order = match self.topo_order() {
            Ok(order) => order,
            Err(e) => {
                error!("router_harness: could not compute deinit order: {e}");
                return;
            }
        };
        for name in order.iter().rev() {
            let plugin = self.loaded.get(name).expect("in topo order");
            if let Err(e) = plugin.deinit(&self.app_info).await {
                error!("router_harness: deinit '{name}' failed: {e}");
            }
        }
    }
}
