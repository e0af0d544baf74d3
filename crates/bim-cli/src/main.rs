mod inspect;
mod scene;

use anyhow::{Context, Result};
use bim_query::QueryConfig;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bim")]
#[command(about = "Briefcase resource cache and range query tools", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List locks cached in a briefcase's .local file
    Locks {
        local: PathBuf,
        /// Show locks held by other briefcases instead of our own
        #[arg(long)]
        unavailable: bool,
        #[arg(long)]
        json: bool,
    },
    /// List codes cached in a briefcase's .local file
    Codes {
        local: PathBuf,
        #[arg(long)]
        unavailable: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the schema version and stamp of a .local file
    Stamp { local: PathBuf },
    /// Run a scene through the range query worker
    Query {
        scene: PathBuf,
        /// TOML file with query worker settings
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Locks {
            local,
            unavailable,
            json,
        } => {
            let store = inspect::open_local(&local)?;
            let locks = inspect::locks(&store, unavailable)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&locks)?);
            } else if locks.is_empty() {
                println!("No locks cached in {}", local.display());
            } else {
                for line in inspect::lock_lines(&locks) {
                    println!("{line}");
                }
            }
        }
        Commands::Codes {
            local,
            unavailable,
            json,
        } => {
            let store = inspect::open_local(&local)?;
            let codes = inspect::codes(&store, unavailable)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&codes)?);
            } else if codes.is_empty() {
                println!("No codes cached in {}", local.display());
            } else {
                for line in inspect::code_lines(&codes) {
                    println!("{line}");
                }
            }
        }
        Commands::Stamp { local } => {
            let store = inspect::open_local(&local)?;
            for line in inspect::stamp_lines(&store)? {
                println!("{line}");
            }
        }
        Commands::Query {
            scene,
            config,
            json,
        } => {
            let config = load_query_config(config.as_deref())?;
            let scene = scene::Scene::load(&scene)?;
            let report = scene::run(scene, config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in report.lines() {
                    println!("{line}");
                }
            }
        }
    }

    Ok(())
}

fn load_query_config(path: Option<&Path>) -> Result<QueryConfig> {
    let Some(path) = path else {
        return Ok(QueryConfig::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
