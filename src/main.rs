use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::admission::{Action, AdmissionController, Context, Registry};
use turnstile::config::TurnstileConfig;
use turnstile::spam::SpamClassifier;

/// In-process admission control: rate policies and spam scoring.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML settings file (TURNSTILE__* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run admission checks for one caller and print each decision
    Check {
        /// Action name, e.g. message:send
        #[arg(short, long)]
        action: String,
        #[arg(short, long)]
        user: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(short, long)]
        resource: Option<String>,
        /// Number of checks to run
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Pause between checks, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// Score text for spam; reads stdin when no text is given
    Classify {
        text: Option<String>,
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Print the effective rule table
    Rules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TurnstileConfig::load(cli.config.as_deref()).context("loading settings")?;
    init_tracing(&config, cli.json_logs);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules = config.rule_set().context("loading rules")?;

    if let Command::Rules = cli.command {
        print!("{}", rules.to_yaml()?);
        return Ok(());
    }

    let registry = Arc::new(
        Registry::new(rules).with_activity_retention(config.admission.activity_retention_secs * 1000),
    );
    let controller = AdmissionController::new(registry.clone()).with_classifier(
        SpamClassifier::new(config.spam.clone()).with_activity(registry.clone()),
    );
    controller.set_enabled(config.admission.enabled);

    let sweeper = registry.start_sweeper(config.sweep_interval());

    let outcome = run(&controller, cli.command).await;

    sweeper.shutdown().await;
    outcome
}

async fn run(controller: &AdmissionController, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Check {
            action,
            user,
            ip,
            resource,
            count,
            interval_ms,
        } => {
            let action: Action = action.parse()?;
            let context = Context {
                user_id: user,
                ip_address: ip,
                user_agent: None,
                resource,
            };

            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);

            for attempt in 1..=count {
                let result = controller.check(action, &context, None)?;
                println!(
                    "{}",
                    json!({ "attempt": attempt, "action": action.as_str(), "result": result })
                );

                if interval_ms > 0 && attempt < count {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                        _ = &mut shutdown => break,
                    }
                }
            }
        }
        Command::Classify { text, user } => {
            let content = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("reading content from stdin")?;
                    buf
                }
            };
            let context = Context {
                user_id: user,
                ..Context::default()
            };

            let verdict = controller.classify(&content, &context);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::Rules => {}
    }
    Ok(())
}

fn init_tracing(config: &TurnstileConfig, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json_logs || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
