//! Agenticide command line front end
//!
//! Loads settings, builds the host with the built-in extensions, enables the
//! configured ones and dispatches a single command. Results go to stdout as
//! JSON, logs go to stderr.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;

use agenticide::config::Settings;
use agenticide::error::{ContextError, Result, RuntimeError};
use agenticide::extensions;
use agenticide::logging::{init_logging, resolve_level};
use agenticide::runtime::Host;

#[derive(Parser, Debug)]
#[command(name = "agenticide")]
#[command(version, about = "Extension host for Agenticide")]
struct Cli {
    /// Configuration file path (default: ~/.agenticide/config.yaml)
    #[arg(short, long, global = true, env = "AGENTICIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: debug, info, warn or error. Overrides `log_level` from
    /// the config file and AGENTICIDE_LOG_LEVEL; RUST_LOG still wins
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Extra extension to enable, on top of `extensions_enabled`
    #[arg(short, long = "enable", value_name = "EXTENSION", global = true)]
    enable: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed extensions and whether they are enabled
    List,

    /// Show the commands an extension provides
    Commands { extension: String },

    /// Run an extension command
    Run {
        extension: String,
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.kind().exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&resolve_level(cli.log_level.as_deref(), &settings))?;

    let host = Host::builder()
        .with_settings(settings)
        .add_extensions(extensions::builtin())
        .build()?;

    host.enable_configured().await?;
    for name in &cli.enable {
        host.enable(name).await?;
    }

    let outcome = tokio::select! {
        outcome = dispatch(&host, cli.command) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Err(RuntimeError::Context(ContextError::Canceled))
        }
    };

    let shutdown = host.shutdown().await;
    outcome.and(shutdown)
}

async fn dispatch(host: &Host, command: Command) -> Result<()> {
    match command {
        Command::List => {
            let mut statuses = host.registry().statuses();
            statuses.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            print_json(&serde_json::to_value(statuses)?)
        }
        Command::Commands { extension } => {
            let commands = host.router().commands(&extension)?;
            print_json(&serde_json::to_value(commands)?)
        }
        Command::Run {
            extension,
            command,
            args,
        } => {
            let result = host.run_command(&extension, &command, &args).await?;
            if !result.data().is_null() {
                print_json(result.data())?;
            }
            result.into_result().map(|_| ())
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
