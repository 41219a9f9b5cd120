// Entry point: parses the command-line surface and dispatches to the
// subcommand implementations. Everything below this file is the engine.

mod commands;
mod errors;
mod installers;
mod libs;
mod logger;
mod schemas;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Declarative, schema-driven manager for your local toolbox.
#[derive(Parser)]
#[command(name = "toolsmith", version)]
struct Cli {
    /// Enables detailed debug output.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Path to the engine config file (default: ~/.toolsmith/config.yaml).
    #[arg(long, global = true, env = "TOOLSMITH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Realize every resource the given manifests describe.
    Apply {
        /// Manifest files or directories, in order.
        paths: Vec<PathBuf>,
        /// Overwrite binaries that differ from their pinned digest and
        /// reinstall recorded resources.
        #[arg(long)]
        force: bool,
        /// Emit failures as JSON objects.
        #[arg(long)]
        json: bool,
    },
    /// Remove recorded tools or runtimes, replaying stored removal steps.
    Remove {
        /// Resource names as recorded in state.
        names: Vec<String>,
    },
    /// Report drift between recorded state and the filesystem.
    Doctor {
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Manage the user-side schema pin.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Show the engine version and schema apiVersion.
    Version,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Rewrite the schema pin with the apiVersion this engine speaks.
    Update {
        /// Directory receiving the pin (default: configured schemaDir,
        /// else the current directory).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.debug);
    log_debug!("[Main] Command line parsed");

    let code = match cli.command {
        Commands::Apply { paths, force, json } => {
            log_debug!("[Main] 'apply' with {} path(s), force={}", paths.len(), force);
            commands::apply::run(cli.config, paths, force, json)
        }
        Commands::Remove { names } => {
            log_debug!("[Main] 'remove' with {} name(s)", names.len());
            commands::remove::run(cli.config, names)
        }
        Commands::Doctor { json } => {
            log_debug!("[Main] 'doctor' (json={})", json);
            commands::doctor::run(cli.config, json)
        }
        Commands::Schema { action } => match action {
            SchemaAction::Update { dir } => {
                log_debug!("[Main] 'schema update'");
                commands::schema::update(cli.config, dir)
            }
        },
        Commands::Version => {
            commands::version::run();
            0
        }
    };
    std::process::exit(code);
}
