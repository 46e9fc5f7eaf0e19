//! flotillad: Flotilla operator binary.
//!
//! Dry-run tooling around the scheduler core: renders the launch call a
//! scheduling pass would send for an app file against an offer file, and
//! evaluates selectors over a set of app files.
//!
//! # Usage
//!
//! ```text
//! flotillad render --app web.toml --offer offer.json
//! flotillad query --app web.toml --app api.toml -l 'team in (infra)' -f runAs=alice
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flotilla_core::{DaemonConfig, LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "flotillad", about = "Flotilla scheduler tooling", version)]
struct Cli {
    /// Daemon configuration file.
    #[arg(short, long, global = true, default_value = "flotilla.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the launch call for an app's slots against an offer.
    Render {
        /// Application version file (.toml or .json).
        #[arg(long)]
        app: PathBuf,
        /// Offer file (.json).
        #[arg(long)]
        offer: PathBuf,
        /// App id; defaults to the app file's stem.
        #[arg(long)]
        app_id: Option<String>,
        /// Slot indices to launch; defaults to every slot.
        #[arg(long = "slot")]
        slots: Vec<u32>,
    },
    /// List the app files whose labels and fields match the selectors.
    Query {
        /// Application version files.
        #[arg(long = "app", required = true)]
        apps: Vec<PathBuf>,
        /// Label selector, e.g. `team=infra,tier notin (batch)`.
        #[arg(short, long)]
        labels: Option<String>,
        /// Field selector, e.g. `runAs=alice`.
        #[arg(short, long)]
        fields: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::from_file(&cli.config)?;
    init_tracing(&config.log);

    match cli.command {
        Command::Render {
            app,
            offer,
            app_id,
            slots,
        } => commands::render::render(&config, &app, &offer, app_id.as_deref(), &slots),
        Command::Query {
            apps,
            labels,
            fields,
        } => commands::query::query(&config, &apps, labels.as_deref(), fields.as_deref()),
    }
}

/// `RUST_LOG` wins over the configured filter. Logs go to stderr so
/// rendered output on stdout stays machine-readable.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
