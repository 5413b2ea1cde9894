//! svcagent - service application lifecycle and background-suspend coordinator
//!
//! Demo entry point: runs a service whose launcher, condition source and
//! freeze broadcast are fed from JSON lines on stdin.

mod cli;
mod launcher;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use svcagent_core::{
    AgentConfig, Bundle, ConditionEvent, ConditionKind, ConfigLoader, LifecycleCallbacks,
    LoopbackConditionSource, LoopbackFreezeChannel, LoopbackLaunchTransport, ProcessLocale,
    ServiceAgent,
};

use cli::{Cli, Commands};
use launcher::Launcher;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_dir,
            json,
        } => {
            let code = run(config, log_dir, json)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::CheckConfig { path } => check_config(&path),
    }
}

/// Resolve the config file: explicit path, else `<config dir>/svcagent/config.toml`
/// when it exists, else defaults.
fn load_config(path: Option<PathBuf>) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let path = path.or_else(|| {
        dirs::config_dir()
            .map(|dir| dir.join("svcagent").join("config.toml"))
            .filter(|candidate| candidate.exists())
    });
    match path {
        Some(path) => Ok(ConfigLoader::load(&path)?),
        None => Ok(AgentConfig::default()),
    }
}

fn init_tracing(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let file_layer = match config.logging.dir.as_deref() {
        Some(dir) => {
            let log_dir = PathBuf::from(ConfigLoader::expand_path(dir));
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("svcagent")
                .filename_suffix("log")
                .max_log_files(7)
                .build(&log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer alive for the program duration.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    if config.logging.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn demo_callbacks() -> LifecycleCallbacks {
    LifecycleCallbacks::new()
        .on_create(|cx| {
            for kind in ConditionKind::ALL {
                cx.on_condition(kind, move |event: &ConditionEvent| {
                    info!("demo: {} -> {:?}", kind, event.value);
                });
            }
            info!("demo: created");
            true
        })
        .on_app_control(|_cx, bundle: &Bundle| {
            let pairs: Vec<String> = bundle.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            info!("demo: app control [{}]", pairs.join(", "));
        })
        .on_low_memory_post(|| info!("demo: low memory post"))
        .on_terminate(|| info!("demo: terminated"))
}

fn run(
    config_path: Option<PathBuf>,
    log_dir: Option<String>,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if log_dir.is_some() {
        config.logging.dir = log_dir;
    }
    config.logging.json |= json;
    init_tracing(&config)?;

    info!("Starting svcagent v{}", env!("CARGO_PKG_VERSION"));

    let launcher = Launcher {
        transport: LoopbackLaunchTransport::new(),
        source: LoopbackConditionSource::new(),
        freeze: LoopbackFreezeChannel::new(),
        pid: std::process::id(),
    };

    let mut agent = ServiceAgent::builder()
        .config(config)
        .transport(launcher.transport.clone())
        .condition_source(launcher.source.clone())
        .freeze_channel(launcher.freeze.clone())
        .locale(ProcessLocale::new())
        .pid(launcher.pid)
        .build()?;

    // Bind before the stdin thread starts so no launcher command is lost.
    let argv: Vec<String> = std::env::args().collect();
    if let Err(e) = agent.initialize(demo_callbacks(), &argv) {
        error!("svcagent initialization failed: {} [{}]", e, e.name());
        return Ok(e.code());
    }
    let _input = launcher.spawn_stdin();

    // The stdin thread is left blocked on read once the agent is done.
    match agent.run_main_loop() {
        Ok(()) => Ok(0),
        Err(e) => {
            error!("svcagent main loop failed: {} [{}]", e, e.name());
            Ok(e.code())
        }
    }
}

fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load(path)?;
    println!("{}: ok", path.display());
    println!("  run_loop.max_batch        = {}", config.run_loop.max_batch);
    println!("  suspend.delay_ms          = {}", config.suspend.delay_ms);
    println!("  freeze.enabled            = {}", config.freeze.enabled);
    println!(
        "  conditions.low_memory_post = {:?}",
        config.conditions.low_memory_post
    );
    Ok(())
}
