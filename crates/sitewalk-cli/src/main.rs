//! sitewalk: route URLs and extract tables from a declarative site file.

mod fetch;
mod site;

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use sitewalk::{Browser, BrowserConfig, CacheMode};
use url::Url;

use crate::fetch::{fetch, FetchOptions};
use crate::site::Site;

#[derive(Parser)]
#[command(
    name = "sitewalk",
    about = "Route URLs to page parsers and extract tables from websites without an API",
    version
)]
struct Cli {
    /// Path to the browser config file (JSON).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the page a URL routes to, without fetching it.
    Route {
        /// Site description file.
        #[arg(short, long)]
        site: PathBuf,

        /// Absolute URL, or a path relative to the base URL.
        url: String,
    },

    /// Fetch a URL and print the routed page and its tables as JSON.
    Fetch {
        /// Site description file.
        #[arg(short, long)]
        site: PathBuf,

        /// Absolute URL, or a path relative to the base URL.
        url: String,

        /// Only extract this table.
        #[arg(long)]
        table: Option<String>,

        /// Follow the page's next link and gather rows from every page.
        #[arg(long)]
        all: bool,

        /// Record every response into this directory.
        #[arg(long, conflicts_with = "replay")]
        record: Option<PathBuf>,

        /// Serve responses from this directory instead of the network.
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   sitewalk completions bash > ~/.local/share/bash-completion/completions/sitewalk
    ///   sitewalk completions zsh > ~/.zfunc/_sitewalk
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Browser config with the site's base URL as fallback.
fn load_config(explicit: Option<&str>, site: &Site) -> anyhow::Result<BrowserConfig> {
    let mut config = BrowserConfig::load(explicit)?;
    if config.base_url.is_none() {
        config.base_url = site.base_url().map(str::to_string);
    }
    if config.base_url.is_none() {
        anyhow::bail!("no base URL: set base_url in the site file, the config file or SITEWALK_BASE_URL");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Route { site, url } => {
            let site = Site::load(&site)?;
            let config = load_config(cli.config.as_deref(), &site)?;
            let base = Url::parse(config.base_url.as_deref().unwrap_or_default())
                .context("invalid base URL")?;
            let target = base.join(&url).with_context(|| format!("invalid URL {url:?}"))?;

            match site.route(&base, &target)? {
                Some(found) => println!("{}", serde_json::to_string_pretty(&found)?),
                None => {
                    eprintln!("No page claims {target}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Fetch {
            site,
            url,
            table,
            all,
            record,
            replay,
        } => {
            let site = Site::load(&site)?;
            let mut config = load_config(cli.config.as_deref(), &site)?;
            if let Some(dir) = record {
                config.responses_dir = Some(dir);
                config.cache_mode = Some(CacheMode::Record);
            }
            if let Some(dir) = replay {
                config.responses_dir = Some(dir);
                config.cache_mode = Some(CacheMode::Replay);
            }

            let mut browser = Browser::new(site.router()?, config)?;
            let report = fetch(&mut browser, &site, &url, &FetchOptions { table, all }).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sitewalk", &mut std::io::stdout());
        }
    }

    Ok(())
}
