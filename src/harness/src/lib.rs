//! The plugin harness: a dependency-ordered lifecycle runner for
//! statically-registered plugins, driven by a [`router_config::Config`].
//!
//! Plugins are Rust trait objects registered at startup rather than
//! `dlopen`'d shared libraries — the harness's load/init/start/join/deinit
//! phases and its ABI/dependency-designator bookkeeping are otherwise
//! unchanged from the original design.

mod descriptor;
mod error;
mod harness;
mod plugin;

pub use descriptor::{AppInfo, PluginDescriptor, ABI_VERSION};
pub use error::{Error, Result};
pub use harness::Harness;
pub use plugin::{LoggerPlugin, Plugin};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use router_config::{Config, Designator, Version};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;

    struct Recorder {
        descriptor: PluginDescriptor,
        init_order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        deinit_order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        async fn init(&self, _app_info: &AppInfo) -> Result<()> {
            self.init_order.lock().unwrap().push(self.descriptor.name);
            Ok(())
        }

        async fn deinit(&self, _app_info: &AppInfo) -> Result<()> {
            self.deinit_order.lock().unwrap().push(self.descriptor.name);
            Ok(())
        }
    }

    fn app_info(config: Config) -> AppInfo {
        AppInfo {
            program: "test".to_string(),
            plugin_folder: PathBuf::new(),
            logging_folder: PathBuf::new(),
            runtime_folder: PathBuf::new(),
            config_folder: PathBuf::new(),
            data_folder: PathBuf::new(),
            config,
        }
    }

    fn recorder(
        name: &'static str,
        requires: Vec<Designator>,
        init_order: &Arc<std::sync::Mutex<Vec<&'static str>>>,
        deinit_order: &Arc<std::sync::Mutex<Vec<&'static str>>>,
    ) -> Arc<Recorder> {
        Arc::new(Recorder {
            descriptor: PluginDescriptor {
                abi_version: ABI_VERSION,
                name,
                brief: "test plugin",
                plugin_version: Version::new(1, 0, 0),
                requires,
                conflicts: Vec::new(),
            },
            init_order: init_order.clone(),
            deinit_order: deinit_order.clone(),
        })
    }

    #[tokio::test]
    async fn initializes_dependencies_before_dependents() {
        let mut config = Config::new(true, vec![]);
        config.add_section("a", "").unwrap();
        config.add_section("b", "").unwrap();

        let init_order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let deinit_order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut harness = Harness::new(app_info(config));
        harness.register(recorder("b", vec![], &init_order, &deinit_order));
        harness.register(recorder(
            "a",
            vec![Designator::parse("b").unwrap()],
            &init_order,
            &deinit_order,
        ));

        harness.load_all().unwrap();
        harness.init_all().await.unwrap();
        assert_eq!(*init_order.lock().unwrap(), vec!["b", "a"]);

        harness.deinit_all().await;
        assert_eq!(*deinit_order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cyclic_dependency_fails_topsort_and_initializes_nothing() {
        let mut config = Config::new(true, vec![]);
        config.add_section("a", "").unwrap();
        config.add_section("b", "").unwrap();

        let init_order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let deinit_order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut harness = Harness::new(app_info(config));
        harness.register(recorder(
            "a",
            vec![Designator::parse("b").unwrap()],
            &init_order,
            &deinit_order,
        ));
        harness.register(recorder(
            "b",
            vec![Designator::parse("a").unwrap()],
            &init_order,
            &deinit_order,
        ));

        harness.load_all().unwrap();
        let result = harness.init_all().await;
        assert!(result.is_err());
        assert!(init_order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected_at_load_time() {
        let mut config = Config::new(true, vec![]);
        config.add_section("a", "").unwrap();
        config.add_section("b", "").unwrap();

        let init_order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let deinit_order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut harness = Harness::new(app_info(config));
        harness.register(recorder("b", vec![], &init_order, &deinit_order));
        harness.register(recorder(
            "a",
            vec![Designator::parse("b(>= 2.0.0)").unwrap()],
            &init_order,
            &deinit_order,
        ));

        assert!(harness.load_all().is_err());
    }

    struct StartStop {
        descriptor: PluginDescriptor,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        start_count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Plugin for StartStop {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        fn has_start(&self) -> bool {
            true
        }

        async fn start(
            &self,
            _section: &router_config::ConfigSection,
            mut stop: watch::Receiver<bool>,
        ) -> Result<()> {
            self.start_count.fetch_add(1, Ordering::SeqCst);
            self.started.store(true, Ordering::SeqCst);
            let _ = stop.changed().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_all_spawns_worker_and_stop_signal_reaches_it() {
        let mut config = Config::new(true, vec![]);
        config.add_section("worker", "").unwrap();

        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let start_count = Arc::new(AtomicU32::new(0));

        let mut harness = Harness::new(app_info(config));
        harness.register(Arc::new(StartStop {
            descriptor: PluginDescriptor {
                abi_version: ABI_VERSION,
                name: "worker",
                brief: "test worker",
                plugin_version: Version::new(1, 0, 0),
                requires: vec![],
                conflicts: vec![],
            },
            started: started.clone(),
            stopped: stopped.clone(),
            start_count: start_count.clone(),
        }));

        harness.load_all().unwrap();
        harness.init_all().await.unwrap();
        let handles = harness.start_all();
        assert_eq!(handles.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(started.load(Ordering::SeqCst));
        assert!(!stopped.load(Ordering::SeqCst));

        harness.request_stop();
        Harness::join_all(handles).await;
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(start_count.load(Ordering::SeqCst), 1);
    }
}
