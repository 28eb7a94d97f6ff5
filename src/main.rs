//! # Novel Lens CLI (`nlens`)
//!
//! ## Usage
//!
//! ```bash
//! nlens --config ./config/nlens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nlens init` | Create the SQLite database and run schema migrations |
//! | `nlens analyze <url>` | Analyze the next batch of uncached novels on a page |
//! | `nlens show <url>` | Show cached assessments for a page |
//! | `nlens map <url>` | Print the raw → canonical identifier map |
//! | `nlens reviews <id>` | Fetch reviews for a canonical id |
//! | `nlens browse <url>...` | Follow a sequence of page navigations |
//! | `nlens watch <file>` | Follow the URL written to a file as it changes |
//! | `nlens cache get/clear` | Inspect or clear cached assessments |
//! | `nlens settings ...` | Show or change API key, model, debug flag, batch limit |
//! | `nlens completions <shell>` | Print shell completions |

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use novel_lens::commands::{self, App};
use novel_lens::config;

/// Novel Lens: AI assessments for novel-listing pages.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, production defaults are used and data is kept under
/// `./data`.
#[derive(Parser)]
#[command(
    name = "nlens",
    about = "Novel Lens: AI assessments for novel-listing pages",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nlens.toml")]
    config: PathBuf,

    /// Log at debug level regardless of the persisted debug setting.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Analyze uncached novels on a listing page.
    ///
    /// Processes at most the configured batch limit per run; run again to
    /// continue with the next batch.
    Analyze {
        /// Listing page URL.
        url: String,

        /// Analyze only the card with this raw id, ignoring the batch limit.
        #[arg(long)]
        raw_id: Option<String>,

        /// Batch limit for this run (1-20).
        #[arg(long)]
        limit: Option<usize>,

        /// Emit one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// Show cached assessments for a listing page without calling Gemini.
    Show {
        url: String,

        #[arg(long)]
        json: bool,
    },

    /// Build and print the identifier map of a listing page.
    Map { url: String },

    /// Fetch the most-liked reviews for a canonical series id.
    Reviews { canonical_id: String },

    /// Visit several listing URLs in order as client-side navigations.
    Browse {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Run the batch analysis on every page.
        #[arg(long)]
        analyze: bool,

        #[arg(long)]
        json: bool,
    },

    /// Follow the page URL kept in a file, refreshing on every settled change.
    ///
    /// Polling and debounce intervals come from the `[navigation]` config
    /// section. Remove or empty the file to stop.
    Watch {
        url_file: PathBuf,

        #[arg(long)]
        analyze: bool,

        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear cached assessments.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show or change runtime settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cached assessment for a canonical id.
    Get { canonical_id: String },
    /// Remove every cached assessment.
    Clear,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings (the API key is masked).
    Show,
    /// Store the Gemini API key. Prompts when no key is given.
    SetKey { key: Option<String> },
    /// Select the Gemini model.
    SetModel { model: String },
    /// Enable or disable debug logging.
    SetDebug {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Set the default batch limit (1-20).
    SetLimit { limit: usize },
    /// List known model names.
    Models,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

fn env_filter(debug: bool) -> Result<EnvFilter> {
    let level = if debug { "novel_lens=debug" } else { "novel_lens=info" };
    Ok(EnvFilter::from_default_env().add_directive(level.parse()?))
}

/// Install the stderr subscriber. The returned handle raises the level once
/// the persisted debug setting is known.
fn init_tracing(debug: bool) -> Result<FilterHandle> {
    let (filter, handle) = reload::Layer::new(env_filter(debug)?);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(handle)
}

fn read_key_from_stdin() -> Result<String> {
    eprint!("Gemini API key: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let key = line.trim().to_string();
    if key.is_empty() {
        bail!("no key entered");
    }
    Ok(key)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "nlens", &mut std::io::stdout());
        return Ok(());
    }

    let filter = init_tracing(cli.verbose)?;
    let cfg = config::load_or_minimal(&cli.config)?;
    if let Commands::Init = cli.command {
        return commands::run_init(&cfg).await;
    }

    let app = App::open(cfg).await?;
    if app.settings.debug() && !cli.verbose {
        filter.reload(env_filter(true)?)?;
    }

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {}
        Commands::Analyze {
            url,
            raw_id,
            limit,
            json,
        } => {
            commands::run_analyze(&app, &url, raw_id.as_deref(), limit, json).await?;
        }
        Commands::Show { url, json } => {
            commands::run_show(&app, &url, json).await?;
        }
        Commands::Map { url } => {
            commands::run_map(&app, &url).await?;
        }
        Commands::Reviews { canonical_id } => {
            commands::run_reviews(&app, &canonical_id).await?;
        }
        Commands::Browse { urls, analyze, json } => {
            commands::run_browse(&app, &urls, analyze, json).await?;
        }
        Commands::Watch {
            url_file,
            analyze,
            json,
        } => {
            commands::run_watch(&app, &url_file, analyze, json).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Get { canonical_id } => {
                commands::run_cache_get(&app, &canonical_id).await?;
            }
            CacheAction::Clear => {
                commands::run_cache_clear(&app).await?;
            }
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => commands::run_settings_show(&app),
            SettingsAction::SetKey { key } => {
                let key = match key {
                    Some(k) => k,
                    None => read_key_from_stdin()?,
                };
                app.settings.set_api_key(&key).await;
                println!("API key saved.");
            }
            SettingsAction::SetModel { model } => {
                app.settings.set_model(&model).await;
                println!("Model set to {}.", model);
            }
            SettingsAction::SetDebug { enabled } => {
                app.settings.set_debug(enabled).await;
                println!("Debug logging {}.", if enabled { "enabled" } else { "disabled" });
            }
            SettingsAction::SetLimit { limit } => {
                let applied = app.settings.set_batch_limit(limit).await;
                println!("Batch limit set to {}.", applied);
            }
            SettingsAction::Models => commands::run_settings_models(&app),
        },
    }

    Ok(())
}
