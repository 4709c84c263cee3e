pub mod cli;
pub mod clients;
pub mod config;
pub mod domain;
pub mod library;
pub mod models;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
pub use config::Config;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        if Config::create_default_if_missing()? {
            println!("✓ Config file created. Edit pikarr.toml and run again.");
        } else {
            println!("pikarr.toml already exists, leaving it untouched.");
        }
        return Ok(());
    }

    let config = Config::load()?;
    config.validate()?;
    init_tracing(&config);

    match cli.command {
        Commands::Episodes { folder, force } => cli::cmd_episodes(&config, &folder, force).await,
        Commands::Rename {
            folder,
            id,
            new_name,
        } => cli::cmd_rename(&config, &folder, &id, &new_name, cli.json).await,
        Commands::Delete { folder, ids, yes } => {
            cli::cmd_delete(&config, &folder, &ids, yes, cli.json).await
        }
        Commands::RefreshLinks { folder, ids, yes } => {
            cli::cmd_refresh_links(&config, &folder, ids, yes, cli.json).await
        }
        Commands::Init => Ok(()),
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.general.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
