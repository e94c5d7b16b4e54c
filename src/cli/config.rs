use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use std::collections::HashMap;
use tracing::{info, debug, error};

use crate::crawler::dedup::SimilarityThreshold;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    pub crawler: CrawlerSettings,
    pub browser: BrowserSettings,
    pub http: HttpSettings,
    pub dedup: DedupSettings,
    pub pipeline: PipelineSettings,
}

/// Crawl loop settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlerSettings {
    pub max_depth: u32,
    pub max_pages: u32,

    /// In-flight tasks
    pub concurrency: usize,

    /// Retries for tasks that failed with a retryable error
    pub max_retries: u32,

    /// Drop follow-ups whose URL was already seen on their route
    pub skip_seen_urls: bool,

    pub allowed_domains: Vec<String>,
    pub url_patterns: UrlPatterns,

    /// Headers added to every request that does not set them itself
    pub default_headers: HashMap<String, String>,
}

/// URL pattern settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UrlPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Browser session pool settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    /// Without a pool every task is fetched over plain HTTP
    pub enabled: bool,
    pub webdriver_url: String,
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub pool_size: usize,
    pub acquire_timeout_secs: u64,
    pub page_load_timeout_secs: u64,

    /// Element whose HTML is extracted after rendering
    pub root_xpath: String,

    /// Load about:blank before each navigation
    pub reset_to_blank: bool,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Plain HTTP client settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Near-duplicate detection settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DedupSettings {
    pub threshold: SimilarityThreshold,
}

/// Persistence settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    /// Concurrent persistence jobs
    pub persist_workers: usize,
    pub sinks: Vec<SinkSettings>,
}

/// A single persistence target
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkSettings {
    /// Log each accepted page
    Log,

    /// Append one JSON document per line
    Jsonl { path: PathBuf },

    Mongodb {
        connection_string: String,
        database_name: String,
        collection: String,
    },

    Postgresql {
        connection_string: String,
        schema_name: String,
        table_name: String,
    },
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 1000,
            concurrency: 8,
            max_retries: 2,
            skip_seen_urls: true,
            allowed_domains: vec![],
            url_patterns: UrlPatterns::default(),
            default_headers: HashMap::from([
                ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
            ]),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            user_agent: None,
            pool_size: 2,
            acquire_timeout_secs: 30,
            page_load_timeout_secs: 30,
            root_xpath: "/html".to_string(),
            reset_to_blank: false,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            persist_workers: 4,
            sinks: vec![SinkSettings::Log],
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    pub fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "route-crawler", "route-crawler") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration, creating it on first use
    pub fn load_default() -> Result<Self> {
        Self::load_default_in(&Self::config_dir())
    }

    /// Load a site profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        Self::load_profile_in(&Self::config_dir(), profile)
    }

    pub fn save_as_default(&self) -> Result<()> {
        self.save_to_file(&Self::config_dir().join("default.yaml"))
    }

    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        self.save_to_file(&profile_path(&Self::config_dir(), profile))
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        Self::list_profiles_in(&Self::config_dir())
    }

    fn load_default_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating {}", config_path.display());
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    fn load_profile_in(config_dir: &Path, profile: &str) -> Result<Self> {
        let path = profile_path(config_dir, profile);

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    fn list_profiles_in(config_dir: &Path) -> Result<Vec<String>> {
        let sites_dir = config_dir.join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(&sites_dir)
            .context(format!("Failed to read profiles directory: {}", sites_dir.display()))?
        {
            let path = entry?.path();

            if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }
}

fn profile_path(config_dir: &Path, profile: &str) -> PathBuf {
    config_dir.join("sites").join(format!("{}.yaml", profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_load_creates_default_file() {
        let dir = TempDir::new().unwrap();

        let config = CrawlerConfig::load_default_in(dir.path()).unwrap();

        assert!(dir.path().join("default.yaml").exists());
        assert_eq!(config.crawler.max_depth, 3);
        assert_eq!(config.dedup.threshold, SimilarityThreshold::MagnitudeScaled { divisor: 30 });
        assert_eq!(config.pipeline.sinks, vec![SinkSettings::Log]);
    }

    #[test]
    fn test_partial_profile_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let sites = dir.path().join("sites");
        fs::create_dir_all(&sites).unwrap();
        fs::write(sites.join("news.yaml"), "\
crawler:
  max_depth: 1
  allowed_domains: [news.example.com]
browser:
  enabled: true
  pool_size: 4
dedup:
  threshold:
    kind: bits
    max_distance: 6
pipeline:
  sinks:
    - type: jsonl
      path: /tmp/news.jsonl
").unwrap();

        let config = CrawlerConfig::load_profile_in(dir.path(), "news").unwrap();

        assert_eq!(config.crawler.max_depth, 1);
        assert_eq!(config.crawler.max_pages, 1000);
        assert!(config.browser.enabled);
        assert_eq!(config.browser.pool_size, 4);
        assert_eq!(config.browser.root_xpath, "/html");
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.dedup.threshold, SimilarityThreshold::Bits { max_distance: 6 });
        assert_eq!(config.pipeline.persist_workers, 4);
        assert_eq!(config.pipeline.sinks, vec![SinkSettings::Jsonl { path: PathBuf::from("/tmp/news.jsonl") }]);
    }

    #[test]
    fn test_missing_profile_fails() {
        let dir = TempDir::new().unwrap();
        assert!(CrawlerConfig::load_profile_in(dir.path(), "nope").is_err());
    }

    #[test]
    fn test_saved_profiles_are_listed() {
        let dir = TempDir::new().unwrap();
        let config = CrawlerConfig::default();

        config.save_to_file(&profile_path(dir.path(), "shop")).unwrap();
        config.save_to_file(&profile_path(dir.path(), "blog")).unwrap();
        fs::write(dir.path().join("sites").join("notes.txt"), "ignored").unwrap();

        assert_eq!(CrawlerConfig::list_profiles_in(dir.path()).unwrap(), vec!["blog", "shop"]);
    }
}
