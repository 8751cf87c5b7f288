//! Gatekeep CLI - sign in, inspect the session and call the API from a terminal.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gatekeep_core::config::{Config, GlobalSettings, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "gatekeep")]
#[command(about = "Gatekeep - session and access control client")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.gatekeep/gatekeep.json)
    #[arg(long, global = true, env = "GATEKEEP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with an e-mail and password
    Login {
        /// E-mail address (prompted when omitted)
        #[arg(short, long)]
        identifier: Option<String>,

        /// Password (prompted when omitted)
        #[arg(long, env = "GATEKEEP_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },

    /// Sign out and discard stored credentials
    Logout,

    /// Show session state and verify it against the provider
    Status,

    /// Print the signed-in identity as JSON
    Whoami,

    /// Call the API with the current session
    Call {
        /// Request path (e.g. /journal)
        path: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,
    },

    /// Check whether the session may open a view
    Check {
        /// View path (e.g. /dashboard/mentor)
        view: String,
    },

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Validate configuration
    Validate,

    /// Print configuration and state paths
    Path,
}

fn init_logging(verbose: bool, settings: &GlobalSettings) {
    let filter = if verbose || settings.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, gatekeep_core::ConfigError> {
    match path {
        Some(path) => {
            let config = Config::load(path)?.with_env_overrides();
            config.validate()?;
            Ok(config)
        }
        None => Config::load_default(),
    }
}

/// Load configuration and start logging for commands that use the session.
fn prepare(cli_verbose: bool, path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = load_config(path)?;
    init_logging(cli_verbose, &config.settings);
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let path = cli.config;

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Login { identifier, secret } => {
            let config = prepare(verbose, path.as_ref())?;
            let args = commands::session::LoginArgs { identifier, secret };
            commands::run_login(&config, args).await?;
        }

        Commands::Logout => {
            let config = prepare(verbose, path.as_ref())?;
            commands::run_logout(&config).await?;
        }

        Commands::Status => {
            let config = prepare(verbose, path.as_ref())?;
            let config_path = path.unwrap_or_else(Config::default_path);
            commands::run_status(&config, &config_path).await?;
        }

        Commands::Whoami => {
            let config = prepare(verbose, path.as_ref())?;
            commands::run_whoami(&config).await?;
        }

        Commands::Call {
            path: request_path,
            method,
            data,
            query,
        } => {
            let config = prepare(verbose, path.as_ref())?;
            let args = commands::call::CallArgs {
                path: request_path,
                method,
                data,
                query,
            };
            commands::run_call(&config, args).await?;
        }

        Commands::Check { view } => {
            let config = prepare(verbose, path.as_ref())?;
            commands::run_check(&config, &view).await?;
        }

        // Reports its own load errors
        Commands::Config { action } => {
            let action = match action {
                None | Some(ConfigCommands::Show) => commands::config::ConfigAction::Show,
                Some(ConfigCommands::Validate) => commands::config::ConfigAction::Validate,
                Some(ConfigCommands::Path) => commands::config::ConfigAction::Path,
            };
            let args = commands::config::ConfigArgs { action, path };
            commands::run_config(&args)?;
        }
    }

    Ok(())
}
