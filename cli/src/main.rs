use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tooloop_core::{AgentLoop, TaskHandle, config, providers, tools};
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser)]
#[command(name = "tooloop")]
#[command(about = "tooloop - bounded tool-use completion loops", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one tool loop to completion
    Run {
        /// Prompt text; read from stdin when omitted
        #[arg(short, long)]
        message: Option<String>,

        /// Tool the model may call (repeatable); defaults to the config allow-list
        #[arg(long = "tool")]
        tools: Vec<String>,

        #[arg(long)]
        max_iterations: Option<u32>,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file if none exists
    Init,
    /// Print the effective config
    Show,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init => {
                if config::config_exists() {
                    println!(
                        "Config already exists at {}",
                        config::get_config_path().display()
                    );
                } else {
                    config::save_config(&config::Config::default())?;
                    println!("Wrote {}", config::get_config_path().display());
                }
            }
            ConfigAction::Show => {
                let mut config = config::Config::load_or_init()?;
                if !config.api_key.is_empty() {
                    config.api_key = "***".to_string();
                }
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
        Commands::Run {
            message,
            tools: tool_names,
            max_iterations,
            timeout_ms,
            max_tokens,
            json,
        } => {
            let config = config::Config::load_or_init()?;

            let message = match message {
                Some(message) => message,
                None => {
                    let mut input = String::new();
                    std::io::stdin()
                        .read_to_string(&mut input)
                        .context("Failed to read prompt from stdin")?;
                    input.trim().to_string()
                }
            };
            if message.is_empty() {
                anyhow::bail!("No prompt given. Pass --message or pipe text on stdin.");
            }

            if !config.workspace_dir.exists() {
                std::fs::create_dir_all(&config.workspace_dir).with_context(|| {
                    format!(
                        "Could not create workspace at {}",
                        config.workspace_dir.display()
                    )
                })?;
            }

            let mut request =
                config.loop_request(vec![tooloop_core::ConversationTurn::user(message)]);
            if !tool_names.is_empty() {
                request = request.with_allowed_tools(tool_names);
            }
            if let Some(max) = max_iterations {
                request = request.with_max_iterations(max);
            }
            if let Some(timeout) = timeout_ms {
                request = request.with_timeout_ms(timeout);
            }
            if let Some(max) = max_tokens {
                request = request.with_max_tokens_per_turn(max);
            }
            request.validate()?;

            let provider = providers::create_provider(&config)?;
            let registry = Arc::new(tools::builtin_registry(&config.workspace_dir));
            let mut agent_loop = AgentLoop::new(provider, registry);
            if !json {
                agent_loop = agent_loop.with_observer(Arc::new(render::ConsoleObserver));
            }

            let handle = TaskHandle::spawn_with_retention(
                agent_loop,
                request,
                Duration::from_millis(config.task.result_retention_ms),
            );

            tracing::debug!(task = %handle.id(), "Spawned tool loop");

            tokio::select! {
                _ = handle.wait_until_terminal() => {}
                _ = tokio::signal::ctrl_c() => {
                    if handle.cancel() {
                        eprintln!("Cancelling...");
                    }
                }
            }

            let result = handle.await_result().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                render::result(&result);
            }

            if !result.is_completed() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
