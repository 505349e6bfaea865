//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

mod error;
use error::{Result, TroveCliError};

use clap::{Parser, Subcommand};
use libtrove::local::{InstalledDatabase, LocalDatabase};
use libtrove::repository::MemoryRepository;
use libtrove::source::TroveSpec;
use libtrove::update::set_pins;
use libtrove::{
    apply_update, parse_change_items, ChangeItem, PlanningContext, UpdateJob, UpdateOptions,
    UpdatePlanner,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

/// Install database below the root
const DB_PATH: &str = "var/lib/trove/troves.redb";
/// Configuration read when --config is not given
const CONFIG_PATH: &str = "etc/troverc";

#[derive(Serialize)]
struct InstalledOutput {
    troves: Vec<TroveOutput>,
}

#[derive(Serialize)]
struct TroveOutput {
    name: String,
    version: String,
    flavor: String,
    pinned: bool,
}

/// trove - plan and apply trove updates
///
/// Troves are looked up in JSON repository files and installed into the
/// database below the root directory.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct App {
    /// Root directory holding the install database
    #[clap(short = 'R', long = "root", global = true, default_value = "/")]
    root: PathBuf,

    /// Configuration file (default: <root>/etc/troverc)
    #[clap(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Repository description to search; may be repeated
    #[clap(short = 'r', long = "repo", global = true)]
    repos: Vec<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install, update or erase troves
    ///
    /// Each item is a trove spec (`name[=version][[flavor]]`, prefixed with
    /// `-` to erase or `+` to install) or the path of a changeset file.
    #[clap(alias = "install")]
    Update {
        /// Show the planned jobs without applying them
        #[clap(short = 'n', long)]
        dry_run: bool,

        /// Install next to the existing version instead of replacing it
        #[clap(long)]
        keep_existing: bool,

        /// Do not resolve dependencies
        #[clap(long)]
        no_deps: bool,

        /// Do not descend into collections
        #[clap(long)]
        no_recurse: bool,

        /// Apply everything as one job
        #[clap(long)]
        no_split: bool,

        /// Bring installed collections back in line with their members
        #[clap(long)]
        sync: bool,

        items: Vec<String>,
    },

    /// Erase troves
    Erase {
        #[clap(short = 'n', long)]
        dry_run: bool,

        #[clap(long)]
        no_deps: bool,

        troves: Vec<String>,
    },

    /// Update every top level installed trove
    Updateall {
        #[clap(short = 'n', long)]
        dry_run: bool,

        #[clap(long)]
        no_deps: bool,
    },

    /// Pin troves so updates install next to them
    Pin { troves: Vec<String> },

    /// Remove pins
    Unpin { troves: Vec<String> },

    /// List installed troves
    List {
        /// Output format (default: table)
        #[clap(short = 'o')]
        output_format: Option<String>,
    },
}

fn load_context(root: &Path, config: Option<&Path>) -> Result<PlanningContext> {
    match config {
        Some(path) => Ok(PlanningContext::load(path)?),
        None => {
            let path = root.join(CONFIG_PATH);
            if path.is_file() {
                Ok(PlanningContext::load(path)?)
            } else {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(PlanningContext::default())
            }
        }
    }
}

fn load_repos(paths: &[PathBuf]) -> Result<MemoryRepository> {
    let mut repos = MemoryRepository::new();
    for path in paths {
        repos.extend(MemoryRepository::load(path)?);
    }
    Ok(repos)
}

fn parse_specs(troves: &[String]) -> Result<Vec<TroveSpec>> {
    Ok(troves
        .iter()
        .map(|t| TroveSpec::parse(t))
        .collect::<libtrove::source::Result<Vec<_>>>()?)
}

/// Plan `items`, print the jobs and apply them unless `dry_run`
fn run_update(
    app: &App,
    items: &[ChangeItem],
    options: &UpdateOptions,
    dry_run: bool,
) -> Result<()> {
    let ctx = load_context(&app.root, app.config.as_deref())?;
    let repos = load_repos(&app.repos)?;
    let mut db = InstalledDatabase::open(app.root.join(DB_PATH))?;

    let uj: UpdateJob = UpdatePlanner::new(&ctx, &db, &repos).plan_update(items, options)?;
    if uj.is_empty() {
        println!("Nothing to do");
        return Ok(());
    }
    print!("{}", uj);

    if dry_run {
        info!("Dry run, nothing applied");
        return Ok(());
    }
    apply_update(&ctx, &mut db, &repos, &uj)?;
    info!("Update applied");
    Ok(())
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .map_err(|e| {
            TroveCliError::LoggingEnvError(format!("Failed to parse environment filter: {}", e))
        })?;

    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .without_time()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = App::parse();
    debug!("Command: {:?}", cli.command);

    match &cli.command {
        Commands::Update {
            dry_run,
            keep_existing,
            no_deps,
            no_recurse,
            no_split,
            sync,
            items,
        } => {
            let options = UpdateOptions {
                keep_existing: *keep_existing,
                recurse: !no_recurse,
                resolve_deps: !no_deps,
                split: !no_split,
                sync: *sync,
                ..Default::default()
            };
            let items = parse_change_items(items, *keep_existing, true)?;
            run_update(&cli, &items, &options, *dry_run)
        }
        Commands::Erase {
            dry_run,
            no_deps,
            troves,
        } => {
            let args: Vec<String> = troves
                .iter()
                .map(|t| {
                    if t.starts_with('-') {
                        t.clone()
                    } else {
                        format!("-{}", t)
                    }
                })
                .collect();
            let options = UpdateOptions {
                resolve_deps: !no_deps,
                ..Default::default()
            };
            let items = parse_change_items(&args, false, false)?;
            run_update(&cli, &items, &options, *dry_run)
        }
        Commands::Updateall { dry_run, no_deps } => {
            let items: Vec<ChangeItem> = {
                let ctx = load_context(&cli.root, cli.config.as_deref())?;
                let repos = load_repos(&cli.repos)?;
                let db = InstalledDatabase::open(cli.root.join(DB_PATH))?;
                UpdatePlanner::new(&ctx, &db, &repos)
                    .full_update_item_list()?
                    .into_iter()
                    .map(ChangeItem::from)
                    .collect()
            };
            let options = UpdateOptions {
                resolve_deps: !no_deps,
                ..Default::default()
            };
            run_update(&cli, &items, &options, *dry_run)
        }
        Commands::Pin { troves } | Commands::Unpin { troves } => {
            let pin = matches!(cli.command, Commands::Pin { .. });
            let specs = parse_specs(troves)?;
            let mut db = InstalledDatabase::open(cli.root.join(DB_PATH))?;
            for tuple in set_pins(&mut db, &specs, pin)? {
                println!("{}", tuple);
            }
            Ok(())
        }
        Commands::List { output_format } => {
            let db = InstalledDatabase::open(cli.root.join(DB_PATH))?;
            let mut tuples = db.all_troves()?;
            tuples.sort();
            let pinned = db.troves_are_pinned(&tuples)?;

            match output_format.as_deref().unwrap_or("table") {
                "table" => {
                    println!("{:<30} {:<40} {}", "NAME", "VERSION", "FLAVOR");
                    for (tuple, pinned) in tuples.iter().zip(pinned) {
                        let mark = if pinned { " (pinned)" } else { "" };
                        println!(
                            "{:<30} {:<40} {}{}",
                            tuple.name,
                            tuple.version.to_string(),
                            tuple.flavor,
                            mark
                        );
                    }
                }
                "json" => {
                    let output = InstalledOutput {
                        troves: tuples
                            .iter()
                            .zip(pinned)
                            .map(|(tuple, pinned)| TroveOutput {
                                name: tuple.name.clone(),
                                version: tuple.version.to_string(),
                                flavor: tuple.flavor.to_string(),
                                pinned,
                            })
                            .collect(),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                other => return Err(TroveCliError::UnsupportedOutputFormat(other.to_string())),
            }
            Ok(())
        }
    }
}
