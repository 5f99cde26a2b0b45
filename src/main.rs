//! # Component Harness CLI (`chx`)
//!
//! The `chx` binary drives the generated-unit pipeline: sanitize and save
//! generated source, render stored units with the fallback chain, curate
//! the library, run chat turns, and start the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! chx --config ./config/chx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx serve` | Start the HTTP server |
//! | `chx sanitize <file>` | Print the cleaned source of raw generated text |
//! | `chx save <file> --intent <text>` | Sanitize and store a generated unit |
//! | `chx units` | List generated units |
//! | `chx show <filename>` | Print a generated unit's source |
//! | `chx render <filename>` | Render a unit to an HTML page |
//! | `chx generate "<message>"` | Run one chat turn |
//! | `chx promote <filename> --name <Name>` | Copy a unit into the library |
//! | `chx library list` | List library records |
//! | `chx library delete <id>` | Delete a library record |
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use component_harness::commands;
use component_harness::config::{self, Config};
use component_harness::server;

/// Component Harness: generate, sanitize, store and render UI units.
#[derive(Parser)]
#[command(
    name = "chx",
    about = "Component Harness: generate, sanitize, store and render UI units",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chx.toml`.
    #[arg(long, global = true, default_value = "./config/chx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Clean raw generated text and print the resulting unit source.
    ///
    /// Runs without a config file.
    Sanitize {
        /// File containing raw generated text.
        file: PathBuf,
    },

    /// Sanitize raw generated text and store it as a generated unit.
    Save {
        /// File containing raw generated text.
        file: PathBuf,

        /// Free-text intent used to build the filename.
        #[arg(long)]
        intent: String,
    },

    /// List generated units.
    Units,

    /// Print the source of a generated unit.
    Show {
        /// Generated unit filename.
        filename: String,
    },

    /// Render a unit to an HTML page on stdout.
    ///
    /// `target` is a stored filename, or a path to a local source file
    /// (which works without a config file).
    Render {
        target: String,

        /// JSON file with the payload to render against.
        #[arg(long)]
        data: Option<PathBuf>,

        /// Export to use when the unit has several.
        #[arg(long)]
        unit: Option<String>,
    },

    /// Run one chat turn: analyze, generate, sanitize, save.
    Generate {
        /// The user message.
        message: String,
    },

    /// Copy a generated unit into the library.
    Promote {
        /// Generated unit filename.
        filename: String,

        /// Requested library name. A numeric suffix is added on collision.
        #[arg(long)]
        name: String,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Infer description, category and tags with the classifier.
        #[arg(long)]
        auto: bool,
    },

    /// Manage library records.
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
}

#[derive(Subcommand)]
enum LibraryAction {
    /// List every record.
    List,
    /// Delete a record and its file.
    Delete {
        /// Record id.
        id: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// The config file if present, else [`Config::minimal`].
fn config_or_minimal(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Sanitize { file } => {
            commands::run_sanitize(file)?;
            return Ok(());
        }
        Commands::Render { target, data, unit } if Path::new(target).is_file() => {
            let cfg = config_or_minimal(&cli.config)?;
            commands::run_render(&cfg, target, data.as_deref(), unit.as_deref()).await?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Save { file, intent } => {
            commands::run_save(&cfg, &file, &intent).await?;
        }
        Commands::Units => {
            commands::run_units(&cfg).await?;
        }
        Commands::Show { filename } => {
            commands::run_show(&cfg, &filename).await?;
        }
        Commands::Render { target, data, unit } => {
            commands::run_render(&cfg, &target, data.as_deref(), unit.as_deref()).await?;
        }
        Commands::Generate { message } => {
            commands::run_generate(&cfg, &message).await?;
        }
        Commands::Promote {
            filename,
            name,
            category,
            description,
            auto,
        } => {
            commands::run_promote(&cfg, &filename, &name, category, description, auto).await?;
        }
        Commands::Library { action } => match action {
            LibraryAction::List => {
                commands::run_library_list(&cfg).await?;
            }
            LibraryAction::Delete { id } => {
                commands::run_library_delete(&cfg, &id).await?;
            }
        },
        Commands::Sanitize { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
