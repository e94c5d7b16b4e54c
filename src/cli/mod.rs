pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (default location when no path is given)
    #[arg(long, global = true, num_args = 0..=1, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl starting from a URL
    Crawl {
        /// Target URL to start crawling from
        #[arg(required = true)]
        url: String,

        /// Site profile to use instead of the default configuration
        #[arg(short, long)]
        profile: Option<String>,

        /// Maximum crawling depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Maximum number of pages to crawl
        #[arg(short, long)]
        limit: Option<u32>,

        /// Render the seed in a browser session
        #[arg(long)]
        dynamic: bool,

        /// Route key for the seed task
        #[arg(short, long, default_value = "/")]
        route: String,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to show, created with defaults if missing
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { url, profile, depth, limit, dynamic, route } => {
            info!("Starting crawl on {} (profile: {})", url, profile.as_deref().unwrap_or("default"));
            commands::crawl(commands::CrawlArgs { url, profile, depth, limit, dynamic, route }).await
        }
        Commands::Config { profile, list } => {
            if list {
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                commands::manage_profile(&profile_name)
            } else {
                commands::show_config()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_crawl_arguments() {
        let cli = Cli::try_parse_from([
            "crawler", "crawl", "https://a.test/", "--dynamic", "--route", "/news", "-d", "2", "-v",
        ]).unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Crawl { url, profile, depth, limit, dynamic, route } => {
                assert_eq!(url, "https://a.test/");
                assert_eq!(profile, None);
                assert_eq!(depth, Some(2));
                assert_eq!(limit, None);
                assert!(dynamic);
                assert_eq!(route, "/news");
            }
            Commands::Config { .. } => panic!("expected crawl"),
        }
    }

    #[test]
    fn test_config_list() {
        let cli = Cli::try_parse_from(["crawler", "config", "--list"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { list: true, profile: None }));
        assert_eq!(cli.log_file, None);
    }

    #[test]
    fn test_log_file_without_path() {
        let cli = Cli::try_parse_from(["crawler", "config", "--log-file"]).unwrap();
        assert_eq!(cli.log_file, Some(None));

        let cli = Cli::try_parse_from(["crawler", "--log-file", "run.log", "config"]).unwrap();
        assert_eq!(cli.log_file, Some(Some(PathBuf::from("run.log"))));
    }
}
