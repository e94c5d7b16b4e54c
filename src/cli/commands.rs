use anyhow::{Result, Context};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::{SessionPool, WebDriverFactory};
use crate::cli::config::CrawlerConfig;
use crate::crawler::bus::{DispatchBus, DispatchSettings};
use crate::crawler::dedup::DedupScheduler;
use crate::crawler::driver::{CrawlDriver, CrawlSummary};
use crate::crawler::processor::LinkProcessor;
use crate::crawler::route::{RouteRegistration, RouteRegistry};
use crate::crawler::simhash::WordTokenizer;
use crate::crawler::task::TaskInfo;
use crate::downloader::{DynamicDownloader, StaticDownloader};
use crate::storage::{self, PipelineSet};
use crate::utils::metrics::{Metrics, MetricsCollector};

pub struct CrawlArgs {
    pub url: String,
    pub profile: Option<String>,
    pub depth: Option<u32>,
    pub limit: Option<u32>,
    pub dynamic: bool,
    pub route: String,
}

/// Build the root route from configuration
async fn build_registry(config: &CrawlerConfig) -> Result<RouteRegistry> {
    let pipelines = storage::create_pipelines(&config.pipeline.sinks).await
        .context("Failed to create pipelines")?;

    let mut root = RouteRegistration::new()
        .processor(Arc::new(LinkProcessor))
        .static_downloader(Arc::new(StaticDownloader::new(&config.http)?))
        .dynamic_downloader(Arc::new(DynamicDownloader::from_settings(&config.browser)))
        .scheduler(Arc::new(DedupScheduler::new(Arc::new(WordTokenizer), config.dedup.threshold)));

    if pipelines.is_empty() {
        warn!("No pipelines configured, crawled pages will not be persisted");
    } else {
        root = root.pipeline(Arc::new(PipelineSet::new(pipelines)));
    }

    let mut builder = RouteRegistry::builder();
    builder.http_settings(config.http.clone());
    builder.register("/", root)?;

    Ok(builder.build()?)
}

/// Crawl from a seed URL until the queue drains or a limit is hit
pub async fn crawl(args: CrawlArgs) -> Result<()> {
    let mut config = match &args.profile {
        Some(profile) => CrawlerConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => CrawlerConfig::load_default()?,
    };

    if let Some(d) = args.depth {
        config.crawler.max_depth = d;
    }

    if let Some(l) = args.limit {
        config.crawler.max_pages = l;
    }

    if args.dynamic && !config.browser.enabled {
        warn!("Browser sessions are disabled in the configuration, fetching over HTTP");
    }

    let seed = TaskInfo::new(args.url)
        .with_route(args.route)
        .dynamic(args.dynamic);

    let (summary, metrics) = run_crawl(&config, seed).await?;

    info!("Crawled {} pages ({} failed)", summary.completed, summary.failed);

    let report = serde_json::json!({
        "summary": summary,
        "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Build everything from `config`, crawl from `seed` and shut down
///
/// Sinks are connected before any browser session is opened, so a sink that
/// fails to start leaves no remote sessions behind.
async fn run_crawl(config: &CrawlerConfig, seed: TaskInfo) -> Result<(CrawlSummary, Metrics)> {
    let registry = build_registry(config).await?;

    let pool = if config.browser.enabled {
        let factory = WebDriverFactory::new(config.browser.clone());
        let pool = SessionPool::create(&factory, config.browser.pool_size).await
            .context("Failed to start browser sessions")?;
        Some(pool)
    } else {
        None
    };

    let settings = DispatchSettings {
        acquire_timeout: Duration::from_secs(config.browser.acquire_timeout_secs),
        persist_workers: config.pipeline.persist_workers,
        default_headers: config.crawler.default_headers.clone(),
    };

    let metrics = MetricsCollector::new();
    let bus = Arc::new(DispatchBus::new(registry, pool, settings, metrics.clone()));
    let driver = CrawlDriver::new(bus.clone(), &config.crawler);

    let summary = driver.run(vec![seed]).await;

    bus.shutdown().await;

    Ok((summary, metrics.get_metrics().await))
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it with defaults if it does not exist
pub fn manage_profile(profile_name: &str) -> Result<()> {
    match CrawlerConfig::load_profile(profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = CrawlerConfig::default();
            config.save_as_profile(profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the default configuration
pub fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    println!("Current configuration ({}):", CrawlerConfig::config_dir().join("default.yaml").display());
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
