use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Log filter: `RUST_LOG` when set, otherwise warn with the crate at info
///
/// `verbose` raises the crate to debug either way.
pub fn build_filter(verbose: bool) -> Result<EnvFilter> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(env.as_deref(), verbose)
}

fn filter_from(env: Option<&str>, verbose: bool) -> Result<EnvFilter> {
    let filter = match env.map(str::trim).filter(|directives| !directives.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_new("warn,route_crawler=info")?,
    };

    Ok(if verbose {
        filter.add_directive("route_crawler=debug".parse()?)
    } else {
        filter
    })
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Install the global subscriber: stderr, plus an appending file layer when `log_file` is set
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(&path)?;
            Some(fmt::layer().with_ansi(false).with_writer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(verbose)?)
        .with(fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE))
        .with(file_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// `crawler.log` in the user's data directory, or under `./logs`
pub fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("com", "route-crawler", "route-crawler")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./logs"))
        .join("crawler.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        let quiet = filter_from(None, false).unwrap().to_string();
        assert!(quiet.contains("warn"));
        assert!(quiet.contains("route_crawler=info"));

        assert!(filter_from(Some("  "), true).unwrap().to_string().contains("route_crawler=debug"));
    }

    #[test]
    fn test_rust_log_replaces_defaults() {
        let filter = filter_from(Some("hyper=trace"), false).unwrap().to_string();
        assert!(filter.contains("hyper=trace"));
        assert!(!filter.contains("warn"));
        assert!(!filter.contains("route_crawler"));

        let verbose = filter_from(Some("hyper=trace"), true).unwrap().to_string();
        assert!(verbose.contains("hyper=trace"));
        assert!(verbose.contains("route_crawler=debug"));
    }


    #[test]
    fn test_default_log_file_name() {
        assert!(default_log_file().ends_with("crawler.log"));
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.log");

        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "first").unwrap();
        }
        {
            use std::io::Write;
            let mut file = open_log_file(&path).unwrap();
            writeln!(file, "second").unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
