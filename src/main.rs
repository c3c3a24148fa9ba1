//! # pkgmirage CLI (`mirage`)
//!
//! The `mirage` binary resolves package-name queries from the terminal and
//! runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! mirage --config ./config/mirage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mirage init` | Create the storage root and run schema migrations |
//! | `mirage search "<query>"` | Resolve a query into verified and invented names |
//! | `mirage index status` | Show the existence snapshot and its freshness |
//! | `mirage index refresh` | Re-fetch every name from the package index |
//! | `mirage cache stats` | Row counts per cache tier |
//! | `mirage cache clear [--type T]` | Clear one tier or all of them |
//! | `mirage cache history` | Prior searches, newest first |
//! | `mirage availability <names…>` | Cached README / bundle flags |
//! | `mirage readme <name>` | Draft (or fetch) a README |
//! | `mirage serve` | Start the HTTP server |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pkgmirage::app::{App, IndexMode};
use pkgmirage::cache::CacheKind;
use pkgmirage::config;
use pkgmirage::existence::RefreshOutcome;
use pkgmirage::{migrate, server, stats};
use pkgmirage_core::models::{ReadmeRequest, SearchResponse};
use tracing_subscriber::EnvFilter;

/// pkgmirage: search results that mix real package names with invented ones.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "mirage",
    about = "pkgmirage: a cache-backed package-name resolver",
    version,
    long_about = "pkgmirage asks a generative model for package names matching a query, \
    checks each against a local snapshot of the package index, invents plausible metadata \
    for the names that do not exist, and caches everything in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mirage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the storage root and schema. Idempotent.
    Init,

    /// Resolve a query.
    ///
    /// Uses the existence snapshot as it is on disk; run `mirage index
    /// refresh` to update it.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[search].default_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,

        /// Skip authoritative metadata lookups for verified names.
        #[arg(long)]
        no_enrich: bool,
    },

    /// Inspect or refresh the existence index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Inspect or clear the cache tiers.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Report whether a README and a bundle are cached for each name.
    Availability {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print a README for a package name, drafting one if none is cached.
    Readme {
        name: String,

        #[arg(long)]
        summary: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum IndexAction {
    Status,
    /// Fetch every name from `[index].source_url` and replace the snapshot.
    Refresh,
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    Clear {
        /// `search`, `readme` or `package`. All tiers when omitted.
        #[arg(long = "type")]
        kind: Option<CacheKind>,
    },
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "mirage", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!(
                "Storage initialized at {}.",
                cfg.storage.root.display()
            );
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        command => {
            let app = App::open(cfg, IndexMode::LoadOnly).await?;
            let result = run(&app, command).await;
            app.close().await;
            result?;
        }
    }

    Ok(())
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Search {
            query,
            limit,
            json,
            no_enrich,
        } => {
            if app.index.is_empty() {
                tracing::warn!("existence index is empty, every name will read as invented");
            }
            let response = app.search(&query, limit, !no_enrich).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_results(&response);
            }
        }
        Commands::Index { action } => match action {
            IndexAction::Status => stats::run_index_status(app).await?,
            IndexAction::Refresh => match app.index.refresh().await? {
                RefreshOutcome::Refreshed { count } => {
                    println!("Existence index refreshed: {} names.", count)
                }
                RefreshOutcome::AlreadyRunning => println!("A refresh is already running."),
            },
        },
        Commands::Cache { action } => match action {
            CacheAction::Stats => stats::run_cache_stats(app).await?,
            CacheAction::History => stats::run_history(app).await?,
            CacheAction::Clear { kind } => {
                let removed = app.caches.clear(kind).await?;
                println!(
                    "Cleared {} ({} rows).",
                    kind.map(|k| k.as_str()).unwrap_or("all caches"),
                    removed
                );
            }
        },
        Commands::Availability { names } => {
            println!("  {:<40} {:>8} {:>8}", "NAME", "README", "BUNDLE");
            for name in &names {
                let a = app.caches.availability(name).await;
                println!(
                    "  {:<40} {:>8} {:>8}",
                    a.name,
                    yes_no(a.readme_cached),
                    yes_no(a.package_cached)
                );
            }
        }
        Commands::Readme { name, summary } => {
            let mut request = ReadmeRequest::named(&name);
            request.summary = summary;
            let readme = app.readme(&request).await?;
            print!("{}", readme.markdown);
        }
        Commands::Init | Commands::Serve | Commands::Completions { .. } => {}
    }
    Ok(())
}

fn print_results(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, record) in response.results.iter().enumerate() {
        let tag = if record.package_exists { "real" } else { "invented" };
        println!("{}. [{}] {} {}", i + 1, tag, record.name, record.version);
        if let Some(summary) = record.summary.as_deref().or(record.description.as_deref()) {
            let line = summary.lines().next().unwrap_or("").trim();
            if !line.is_empty() {
                println!("    {}", line);
            }
        }
        if let Some(ref url) = record.home_page {
            println!("    url: {}", url);
        }
        println!(
            "    readme: {}  bundle: {}",
            yes_no(record.readme_cached),
            yes_no(record.package_cached)
        );
        println!();
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
