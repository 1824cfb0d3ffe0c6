use anyhow::{bail, Context, Result};
use clap::Parser;
use common::metrics::process_unix::ProcessRecorder;
use common::ShutdownMessage;
use router_harness::{AppInfo, Harness, LoggerPlugin};
use router_metadata_cache::MetadataCachePlugin;
use router_routing::RoutingPlugin;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Transparent, protocol-aware router in front of an InnoDB Cluster
/// replica set.
#[derive(Parser, Debug)]
#[command(name = "router")]
struct RouterArgs {
    /// Override a default-section option, e.g. `--param logging_folder=`.
    #[arg(long = "param", value_name = "name=value")]
    param: Vec<String>,

    /// Log to stderr instead of the configured logging folder.
    #[arg(long)]
    console: bool,

    /// Log level, overridden by RUST_LOG when set.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Path to the router's ini-style config file.
    config_file: PathBuf,
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) => Ok((name.to_string(), value.to_string())),
        None => bail!("--param expects name=value, got '{raw}'"),
    }
}

fn init_logging(console: bool, log_level: Option<&str>, app_info: &AppInfo) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = log_level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if console || app_info.logging_folder.as_os_str().is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .init();
        None
    } else {
        let file_name = if app_info.program.is_empty() {
            "mysqlrouter".to_string()
        } else {
            app_info.program.clone()
        };
        let appender = tracing_appender::rolling::daily(&app_info.logging_folder, &file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    }
}

fn load_config(args: &RouterArgs) -> Result<router_config::Config> {
    let text = std::fs::read_to_string(&args.config_file)
        .with_context(|| format!("reading config file '{}'", args.config_file.display()))?;
    let reserved = vec!["default*".to_string()];
    let mut config = router_config::ini::parse(&text, true, reserved)
        .with_context(|| format!("parsing config file '{}'", args.config_file.display()))?;

    for raw in &args.param {
        let (name, value) = parse_param(raw)?;
        config
            .defaults_mut()
            .set(&name, &value)
            .with_context(|| format!("applying --param {name}={value}"))?;
    }
    if args.console {
        config.defaults_mut().set("logging_folder", "")?;
    }
    Ok(config)
}

fn folder_option(config: &router_config::Config, name: &str) -> PathBuf {
    config
        .defaults()
        .get(name, None)
        .unwrap_or_default()
        .into()
}

fn build_app_info(program: &str, config: router_config::Config) -> AppInfo {
    AppInfo {
        program: {
            let configured = config.defaults().get("program", None).unwrap_or_default();
            if configured.is_empty() {
                program.to_string()
            } else {
                configured
            }
        },
        plugin_folder: folder_option(&config, "plugin_folder"),
        logging_folder: folder_option(&config, "logging_folder"),
        runtime_folder: folder_option(&config, "runtime_folder"),
        config_folder: folder_option(&config, "config_folder"),
        data_folder: folder_option(&config, "data_folder"),
        config,
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl_c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn run(args: RouterArgs) -> Result<()> {
    let config = load_config(&args)?;
    let app_info = build_app_info("mysqlrouter", config);
    let _logging_guard = init_logging(args.console, args.log_level.as_deref(), &app_info);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("router-worker")
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async_main(app_info))
}

async fn async_main(app_info: AppInfo) -> Result<()> {
    let mut harness = Harness::new(app_info);
    harness.register(Arc::new(LoggerPlugin::new()));
    harness.register(Arc::new(MetadataCachePlugin::new()));
    harness.register(Arc::new(RoutingPlugin::new()));

    harness.load_all().context("loading configured plugins")?;
    harness
        .init_all()
        .await
        .context("initializing configured plugins")?;

    common::metrics::init_metrics_context();
    let (metrics_stop_tx, metrics_stop_rx) = watch::channel(ShutdownMessage::Init);
    let mut process_recorder =
        ProcessRecorder::new(common::metrics::common_labels().clone(), metrics_stop_rx);
    let metrics_handle = tokio::spawn(async move {
        process_recorder.start_auto_collect().await;
    });

    info!("router started, waiting for shutdown signal");
    let handles = harness.start_all();

    wait_for_shutdown_signal().await;

    harness.request_stop();
    Harness::join_all(handles).await;

    let _ = metrics_stop_tx.send(ShutdownMessage::Cancel("router shutting down".to_string()));
    let _ = metrics_handle.await;

    harness.deinit_all().await;
    info!("router stopped");
    Ok(())
}

fn main() -> std::process::ExitCode {
    let args = RouterArgs::parse();
    match run(args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("router: fatal startup error: {e:?}");
            eprintln!("router: {e:?}");
            std::process::ExitCode::FAILURE
        }
    }
}
