//! Command-line interface
//!
//! Every command prints its result as pretty JSON on stdout; diagnostics go
//! through `tracing`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::automation::rules::AutomationRules;
use crate::core::config::ConfigArgs;
use crate::core::services::Services;

#[derive(Debug, Parser)]
#[command(name = "streambox")]
#[command(about = "Run streaming extensions and resolve their streams", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the catalog sections an extension offers
    Catalog {
        /// Extension id
        extension: String,
    },
    /// List the genres an extension offers
    Genres { extension: String },
    /// List posts for a catalog filter
    Posts {
        extension: String,
        filter: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Search an extension
    Search {
        extension: String,
        query: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Show details for a post link
    Meta { extension: String, link: String },
    /// List episodes behind an episodes link
    Episodes { extension: String, link: String },
    /// List stream sources for a link
    Streams {
        extension: String,
        link: String,
        /// Content type passed to the extension
        #[arg(short = 't', long = "type", default_value = "movie")]
        content_type: String,
        /// Resolve automate/http sources into playable ones
        #[arg(long)]
        resolve: bool,
    },
    /// Run automation rules against a page
    Extract {
        url: String,
        /// JSON file holding the rules object
        rules: PathBuf,
    },
    /// List installed extensions
    List,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Execute one command against the wired services
pub async fn run(command: Commands, services: &Services) -> Result<()> {
    let executor = &services.executor;

    match command {
        Commands::Catalog { extension } => print_json(&executor.get_catalog(&extension).await),
        Commands::Genres { extension } => print_json(&executor.get_genres(&extension).await),
        Commands::Posts { extension, filter, page } => {
            print_json(&executor.get_posts(&extension, &filter, page).await)
        }
        Commands::Search { extension, query, page } => {
            print_json(&executor.search_posts(&extension, &query, page).await)
        }
        Commands::Meta { extension, link } => print_json(&executor.get_metadata(&extension, &link).await),
        Commands::Episodes { extension, link } => print_json(&executor.get_episodes(&extension, &link).await),
        Commands::Streams {
            extension,
            link,
            content_type,
            resolve,
        } => {
            let streams = executor.get_streams(&extension, &link, &content_type).await;
            if !resolve {
                return print_json(&streams);
            }
            let mut resolved = Vec::new();
            for stream in &streams {
                resolved.extend(services.resolver.resolve(stream).await);
            }
            info!(found = streams.len(), resolved = resolved.len(), "Resolved streams");
            print_json(&resolved)
        }
        Commands::Extract { url, rules } => {
            let text = tokio::fs::read_to_string(&rules)
                .await
                .with_context(|| format!("Failed to read rules file {}", rules.display()))?;
            let rules = AutomationRules::from_str_lenient(&text)
                .with_context(|| format!("{} holds no automation rules", rules.display()))?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            print_json(&services.engine.extract(&url, &rules, cancel).await)
        }
        Commands::List => print_json(&services.modules.list().await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_streams_flags() {
        let cli = Cli::parse_from([
            "streambox",
            "--extensions-dir",
            "/tmp/ext",
            "streams",
            "demo",
            "https://h/x",
            "--type",
            "series",
            "--resolve",
        ]);
        assert_eq!(cli.config.extensions_dir, Some(PathBuf::from("/tmp/ext")));
        match cli.command {
            Commands::Streams {
                content_type, resolve, ..
            } => {
                assert_eq!(content_type, "series");
                assert!(resolve);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_page_defaults_to_one() {
        let cli = Cli::parse_from(["streambox", "posts", "demo", "/latest"]);
        assert!(matches!(cli.command, Commands::Posts { page: 1, .. }));
    }
}
