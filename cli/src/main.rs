use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use frost_kernel::apply::apply_updates;
use frost_kernel::config::CatalogConfig;
use frost_kernel::credentials::policy::{AccessPolicy, WriteScope};
use frost_kernel::credentials::AccessMode;
use frost_kernel::diff::diff;
use frost_kernel::metadata::TableMetadata;
use frost_kernel::storage::ObjectPath;
use frost_kernel::update::{TableRequirement, TableUpdate};

mod logging;

/// Frost table catalog tooling (dry-run)
#[derive(Parser, Debug)]
#[command(name = "frost")]
#[command(about = "Frost table catalog tooling (dry-run)", long_about = None)]
struct Cli {
    /// Path to catalog config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply an update file to a metadata file and print the result
    Apply {
        /// Base metadata JSON; omit to create a table from the updates
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// JSON list of updates, or an object with `requirements` and `updates`
        #[arg(long)]
        updates: PathBuf,
    },

    /// Print the updates that turn one metadata file into another
    Diff {
        #[arg(long)]
        base: PathBuf,

        #[arg(long)]
        target: PathBuf,
    },

    /// Print the storage policy a credential for a table location gets
    Policy {
        /// Table location, e.g. s3://bucket/wh/db1/schema/t
        #[arg(long)]
        location: String,

        #[arg(long, value_enum, default_value_t = Mode::Read)]
        mode: Mode,

        /// Overrides the configured write scope
        #[arg(long, value_enum)]
        scope: Option<Scope>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scope {
    TableLocation,
    DataOnly,
}

/// Accepted shapes of the `--updates` file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpdateFile {
    Commit {
        #[serde(default)]
        requirements: Vec<TableRequirement>,
        updates: Vec<TableUpdate>,
    },
    Updates(Vec<TableUpdate>),
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("cannot parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = match &cli.config {
        Some(path) => CatalogConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => CatalogConfig::default_config(),
    };
    logging::init(&config.logging)?;

    match cli.command {
        Command::Apply { metadata, updates } => {
            let base = metadata
                .as_deref()
                .map(read_json::<TableMetadata>)
                .transpose()?;
            let (requirements, updates) = match read_json::<UpdateFile>(&updates)? {
                UpdateFile::Commit {
                    requirements,
                    updates,
                } => (requirements, updates),
                UpdateFile::Updates(updates) => (Vec::new(), updates),
            };

            for requirement in &requirements {
                requirement.check(base.as_ref())?;
            }
            let next = apply_updates(base.as_ref(), &updates)?;
            tracing::info!(updates = updates.len(), "updates applied");
            print_json(&next)
        }

        Command::Diff { base, target } => {
            let base: TableMetadata = read_json(&base)?;
            let target: TableMetadata = read_json(&target)?;
            let updates = diff(&base, &target);
            tracing::info!(updates = updates.len(), "diff computed");
            print_json(&updates)
        }

        Command::Policy {
            location,
            mode,
            scope,
        } => {
            let path = ObjectPath::parse(&location)?;
            let mode = match mode {
                Mode::Read => AccessMode::Read,
                Mode::Write => AccessMode::Write,
            };
            let scope = match scope {
                Some(Scope::TableLocation) => WriteScope::TableLocation,
                Some(Scope::DataOnly) => WriteScope::DataOnly,
                None => config.credentials.write_scope,
            };
            print_json(&AccessPolicy::for_table(&path, mode, scope))
        }
    }
}
