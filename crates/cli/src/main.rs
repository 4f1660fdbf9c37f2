//! QBit CLI
//!
//! Ask the QBit session service a question from the terminal, follow an
//! existing session, or inspect the resolved configuration.

mod cmd_ask;
mod cmd_config;
mod cmd_watch;
mod logging;
mod paths;
mod render;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, CommandFactory, Parser, Subcommand};
use qbit_client::ClientConfig;

use crate::cmd_ask::{AskOptions, Pick};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "qbit")]
#[command(version, about = "Ask the QBit session service from the terminal", long_about = None)]
struct Cli {
    /// Data directory for config and logs (default: ~/.qbit)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session service root, e.g. https://host/qb/v1
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Authentication token
    #[arg(long, global = true)]
    token: Option<String>,

    /// Model vendor sent with prompts
    #[arg(long, global = true)]
    vendor: Option<String>,

    /// Model sent with prompts
    #[arg(long, global = true)]
    model: Option<String>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question in a new session
    Ask(AskArgs),

    /// Follow the event stream of an existing session
    Watch {
        session_id: String,

        /// Print each event as one JSON line
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration
    Config,

    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

#[derive(Args, Debug)]
struct AskArgs {
    /// The prompt
    prompt: Option<String>,

    /// Read the prompt from stdin
    #[arg(long, conflicts_with = "prompt")]
    stdin: bool,

    /// Choose the N-th offered action (1-based) if several are offered
    #[arg(long, conflicts_with = "pick_app")]
    pick: Option<usize>,

    /// Choose the offered action with this app id
    #[arg(long)]
    pick_app: Option<String>,

    /// Print the final conversation state as JSON
    #[arg(long)]
    json: bool,
}

impl AskArgs {
    fn into_options(self) -> AskOptions {
        let pick = match (self.pick, self.pick_app) {
            (Some(n), _) => Some(Pick::Number(n)),
            (None, Some(id)) => Some(Pick::AppId(id)),
            (None, None) => None,
        };
        AskOptions {
            prompt: self.prompt,
            stdin: self.stdin,
            pick,
            json: self.json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "qbit", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = paths::init_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs().with_context(|| format!("creating {}", data_dir.display()))?;
    let logging = logging::init_logging(&paths::log_dir(), cli.verbose)?;
    tracing::info!(
        component = "cli",
        event = "cli.start",
        run_id = %logging.run_id,
        version = VERSION,
        data_dir = %data_dir.display(),
        "qbit starting"
    );

    let config_path = cli.config.clone().unwrap_or_else(paths::config_path);
    let config = resolve_config(&cli, &config_path)?;

    match cli.command {
        Command::Ask(args) => cmd_ask::run(config, args.into_options()).await,
        Command::Watch { session_id, json } => cmd_watch::run(config, &session_id, json).await,
        Command::Config => cmd_config::run(&config, &data_dir, &config_path),
        Command::Completions { .. } => Ok(()),
    }
}

/// defaults < config file < QBIT_* env < flags
fn resolve_config(cli: &Cli, path: &std::path::Path) -> anyhow::Result<ClientConfig> {
    if cli.config.is_some() && !path.exists() {
        bail!("config file {} does not exist", path.display());
    }
    let mut config = ClientConfig::load(Some(path))?;
    apply_flags(&mut config, cli);
    Ok(config)
}

fn apply_flags(config: &mut ClientConfig, cli: &Cli) {
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.auth_token = Some(token.clone());
    }
    if let Some(vendor) = &cli.vendor {
        config.vendor = vendor.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
}
