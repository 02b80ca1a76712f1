use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

use sambung_bot::application::errors::{BotError, ConfigError};
use sambung_bot::application::services::{build_plugin_manager, read_instructions, run_worker, WorkerLink, WorkerService};
use sambung_bot::application::supervisor::{ipc, ChangeClassifier, Supervisor, Timings};
use sambung_bot::domain::traits::NetworkClient;
use sambung_bot::infrastructure::adapters::{ConsoleAdapter, TelegramAdapter};
use sambung_bot::infrastructure::config::Config;
use sambung_bot::infrastructure::process::ProcessLauncher;
use sambung_bot::infrastructure::watcher::FsChangeSource;

#[derive(Parser)]
#[command(name = "sambung-bot")]
#[command(about = "A plugin-based chat bot with a supervising watchdog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: String,

    /// Bot token (overrides config)
    #[arg(short, long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot under the supervisor
    Run,
    /// Run the bot worker in the foreground
    Worker,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; a supervised worker's stdout carries IPC
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run => run_supervisor(cli.config, cli.token).await,
        Commands::Worker => run_worker_process(cli.config, cli.token).await,
        Commands::Version => {
            println!("sambung-bot v{}", env!("CARGO_PKG_VERSION"));
            0
        }
        Commands::InitConfig => init_config(),
    };

    std::process::exit(code);
}

fn load_config(path: &str, token_override: Option<String>) -> Result<Config, ConfigError> {
    let mut config = Config::load_or_default(path)?;
    if let Some(token) = token_override {
        config.set_token(token);
    }
    Ok(config)
}

async fn run_supervisor(config_path: String, token_override: Option<String>) -> i32 {
    let config = match load_config(&config_path, token_override.clone()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return 1;
        }
    };

    if config.telegram_token().is_none() {
        tracing::error!(
            "The supervised worker needs a Telegram token: set adapters.telegram.token, BOT_TOKEN or --token \
             (use the `worker` command for the console adapter)"
        );
        return 1;
    }

    tracing::info!("Starting {} supervisor", config.bot.name);

    let mut launcher = match ProcessLauncher::current_exe(vec![
        "worker".to_string(),
        "--config".to_string(),
        config_path.clone(),
    ]) {
        Ok(launcher) => launcher,
        Err(e) => {
            tracing::error!("{}", e);
            return 1;
        }
    };
    // Hand the token over by environment rather than argv
    if let Some(token) = token_override {
        launcher = launcher.with_env("BOT_TOKEN", token);
    }

    let entry = config
        .supervisor
        .entry
        .clone()
        .unwrap_or_else(|| launcher.program().clone());

    let classifier = match ChangeClassifier::new(
        Some(&entry),
        &config.plugins.directory,
        &config.supervisor.config_patterns,
        &config.supervisor.ignore_patterns,
    ) {
        Ok(classifier) => classifier,
        Err(e) => {
            tracing::error!("{}", e);
            return 1;
        }
    };

    let mut watched = config.supervisor.watch.clone();
    watched.push(config.plugins.directory.clone());
    watched.push(PathBuf::from(&config_path));
    let mut source = FsChangeSource::new(watched);
    if let Some(dir) = entry.parent() {
        source = source.with_shallow(dir);
    }

    let supervisor = Supervisor::new(
        Arc::new(launcher),
        Arc::new(source),
        classifier,
        Timings::from(&config.supervisor),
    );

    let handle = supervisor.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown();
    });

    supervisor.run().await
}

async fn run_worker_process(config_path: String, token_override: Option<String>) -> i32 {
    let supervised = ipc::is_supervised();

    let config = match load_config(&config_path, token_override) {
        Ok(config) => config,
        Err(e) => return fail_startup(BotError::Config(e)),
    };

    let manager = match build_plugin_manager(&config) {
        Ok(manager) => manager,
        Err(e) => return fail_startup(e),
    };

    tracing::info!("Starting {} worker", config.bot.name);

    if let Some(token) = config.telegram_token() {
        let client = Arc::new(TelegramAdapter::new(token));
        serve(WorkerService::new(manager, client, &config), supervised).await
    } else if supervised {
        fail_startup(BotError::Config(ConfigError::MissingField(
            "adapters.telegram.token".to_string(),
        )))
    } else {
        let client = Arc::new(ConsoleAdapter::new());
        serve(WorkerService::new(manager, client, &config), false).await
    }
}

async fn serve<C: NetworkClient + 'static>(service: WorkerService<C>, supervised: bool) -> i32 {
    if supervised {
        let service = service.with_link(WorkerLink::stdout());
        let instructions = read_instructions(BufReader::new(tokio::io::stdin()));

        // The supervisor stops us by closing stdin
        tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Interrupt ignored, waiting for the supervisor");
            }
        });

        return run_worker(service, Some(instructions)).await;
    }

    tokio::select! {
        code = run_worker(service, None) => code,
        _ = shutdown_signal() => {
            tracing::info!("Interrupted, stopping worker");
            0
        }
    }
}

/// Bad configuration: exit non-zero without asking for an immediate restart,
/// so the supervisor retries after its backoff
fn fail_startup(error: BotError) -> i32 {
    tracing::error!("Worker failed to start: {}", error);
    1
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
            }
            _ => {
                tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

fn init_config() -> i32 {
    match Config::default().to_yaml() {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
            0
        }
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    }
}
