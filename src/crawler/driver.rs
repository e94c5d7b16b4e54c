use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cli::config::CrawlerSettings;
use crate::crawler::bus::{DispatchBus, DispatchError};
use crate::crawler::filter::UrlFilter;
use crate::crawler::task::TaskInfo;

/// Totals of one crawl run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Tasks the bus completed
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
    pub skipped_filtered: usize,
    pub skipped_seen: usize,
    pub skipped_depth: usize,

    /// Tasks left in the queue when the page limit was reached
    pub unvisited: usize,
    pub elapsed_ms: u64,
}

struct QueuedTask {
    task: TaskInfo,
    depth: u32,
    attempt: u32,
}

type Finished = (Result<Vec<TaskInfo>, DispatchError>, TaskInfo, u32, u32);

/// Breadth-first crawl loop over a [`DispatchBus`]
pub struct CrawlDriver {
    bus: Arc<DispatchBus>,
    filter: UrlFilter,
    max_depth: u32,
    max_pages: usize,
    concurrency: usize,
    max_retries: u32,
    skip_seen_urls: bool,
}

impl CrawlDriver {
    pub fn new(bus: Arc<DispatchBus>, settings: &CrawlerSettings) -> Self {
        Self {
            bus,
            filter: UrlFilter::new(settings),
            max_depth: settings.max_depth,
            max_pages: settings.max_pages as usize,
            concurrency: settings.concurrency.max(1),
            max_retries: settings.max_retries,
            skip_seen_urls: settings.skip_seen_urls,
        }
    }

    /// Crawl from `seeds` until the queue is empty or the page limit is hit
    ///
    /// A `max_pages` of zero means no limit.
    pub async fn run(&self, seeds: Vec<TaskInfo>) -> CrawlSummary {
        let started = Instant::now();
        let mut summary = CrawlSummary::default();
        let mut queue = VecDeque::new();

        for seed in seeds {
            self.enqueue(&mut queue, seed, 0, &mut summary);
        }

        info!("Starting crawl with {} seed tasks", queue.len());

        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut dispatched = 0usize;

        loop {
            while in_flight.len() < self.concurrency && !self.page_limit_reached(dispatched) {
                let Some(next) = queue.pop_front() else {
                    break;
                };

                dispatched += 1;
                let bus = self.bus.clone();

                in_flight.spawn(async move {
                    let QueuedTask { task, depth, attempt } = next;
                    let retry = task.detached();
                    let outcome = bus.run_task(task).await;
                    (outcome, retry, depth, attempt)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((Ok(follow_ups), _, depth, _)) => {
                    summary.completed += 1;

                    for follow_up in follow_ups {
                        if depth >= self.max_depth {
                            summary.skipped_depth += 1;
                            continue;
                        }
                        self.enqueue(&mut queue, follow_up, depth + 1, &mut summary);
                    }
                }
                Ok((Err(e), task, depth, attempt)) => {
                    if e.is_retryable() && attempt < self.max_retries {
                        warn!("Retrying {} (attempt {}): {}", task.url().unwrap_or("<continuation>"), attempt + 1, e);
                        summary.retried += 1;
                        dispatched -= 1;
                        queue.push_back(QueuedTask { task, depth, attempt: attempt + 1 });
                    } else {
                        error!("Task for {} failed: {}", task.url().unwrap_or("<continuation>"), e);
                        summary.failed += 1;
                    }
                }
                Err(e) => {
                    error!("Crawl task panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary.unvisited = queue.len();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "Crawl finished: {} completed, {} failed, {} unvisited in {} ms",
            summary.completed, summary.failed, summary.unvisited, summary.elapsed_ms
        );

        summary
    }

    fn page_limit_reached(&self, dispatched: usize) -> bool {
        self.max_pages > 0 && dispatched >= self.max_pages
    }

    fn enqueue(&self, queue: &mut VecDeque<QueuedTask>, task: TaskInfo, depth: u32, summary: &mut CrawlSummary) {
        if let Some(url) = task.url() {
            if let Err(reason) = self.filter.check(url) {
                debug!("Not following {}: {}", url, reason);
                summary.skipped_filtered += 1;
                return;
            }

            if self.skip_seen_urls && self.bus.url_is_repeated(&task) {
                debug!("Already seen {}", url);
                summary.skipped_seen += 1;
                return;
            }
        }

        queue.push_back(QueuedTask { task, depth, attempt: 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::SessionPool;
    use crate::cli::config::UrlPatterns;
    use crate::crawler::bus::DispatchSettings;
    use crate::crawler::processor::LinkProcessor;
    use crate::crawler::route::{RouteRegistration, RouteRegistry};
    use crate::downloader::DownloaderKind;
    use crate::testing::{FakeFactory, RecordingPipeline, StubDownloader};
    use crate::utils::metrics::MetricsCollector;
    use std::time::Duration;

    fn site() -> StubDownloader {
        StubDownloader::new(DownloaderKind::Static)
            .with_page("https://site.test/", r#"<a href="/a">a</a><a href="/b">b</a><a href="https://other.test/">x</a>"#)
            .with_page("https://site.test/a", r#"<p>page a</p><a href="/b">b</a><a href="/c">c</a>"#)
            .with_page("https://site.test/b", r#"<p>page b</p><a href="/">home</a>"#)
            .with_page("https://site.test/c", r#"<p>page c</p><a href="/d">d</a>"#)
            .with_page("https://site.test/d", r#"<p>page d</p>"#)
    }

    fn bus_over(downloader: Arc<StubDownloader>, pool: Option<SessionPool>, settings: DispatchSettings) -> Arc<DispatchBus> {
        let mut builder = RouteRegistry::builder();
        builder.register("/", RouteRegistration::new()
            .processor(Arc::new(LinkProcessor))
            .pipeline(Arc::new(RecordingPipeline::new()))
            .static_downloader(downloader.clone())
            .dynamic_downloader(downloader))
            .unwrap();
        Arc::new(DispatchBus::new(builder.build().unwrap(), pool, settings, MetricsCollector::new()))
    }

    fn settings() -> CrawlerSettings {
        CrawlerSettings {
            max_depth: 5,
            max_pages: 0,
            concurrency: 1,
            allowed_domains: vec!["site.test".to_string()],
            ..CrawlerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_breadth_first_order() {
        let downloader = Arc::new(site());
        let bus = bus_over(downloader.clone(), None, DispatchSettings::default());

        let summary = CrawlDriver::new(bus, &settings())
            .run(vec![TaskInfo::new("https://site.test/")])
            .await;

        assert_eq!(downloader.fetched(), vec![
            "https://site.test/",
            "https://site.test/a",
            "https://site.test/b",
            "https://site.test/c",
            "https://site.test/d",
        ]);
        assert_eq!(summary.completed, 5);
        assert_eq!(summary.skipped_filtered, 1);
        assert_eq!(summary.skipped_seen, 2);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let downloader = Arc::new(site());
        let bus = bus_over(downloader.clone(), None, DispatchSettings::default());
        let settings = CrawlerSettings { max_depth: 1, ..settings() };

        let summary = CrawlDriver::new(bus, &settings)
            .run(vec![TaskInfo::new("https://site.test/")])
            .await;

        assert_eq!(downloader.fetched(), vec![
            "https://site.test/",
            "https://site.test/a",
            "https://site.test/b",
        ]);
        assert_eq!(summary.skipped_depth, 3);
    }

    #[tokio::test]
    async fn test_page_limit() {
        let downloader = Arc::new(site());
        let bus = bus_over(downloader.clone(), None, DispatchSettings::default());
        let settings = CrawlerSettings { max_pages: 2, ..settings() };

        let summary = CrawlDriver::new(bus, &settings)
            .run(vec![TaskInfo::new("https://site.test/")])
            .await;

        assert_eq!(downloader.fetched().len(), 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.unvisited, 2);
    }

    #[tokio::test]
    async fn test_exclude_pattern() {
        let downloader = Arc::new(site());
        let bus = bus_over(downloader.clone(), None, DispatchSettings::default());
        let settings = CrawlerSettings {
            url_patterns: UrlPatterns { include: vec![], exclude: vec![r"/c$".to_string()] },
            ..settings()
        };

        CrawlDriver::new(bus, &settings)
            .run(vec![TaskInfo::new("https://site.test/")])
            .await;

        assert!(!downloader.fetched().contains(&"https://site.test/c".to_string()));
        assert!(!downloader.fetched().contains(&"https://site.test/d".to_string()));
    }

    #[tokio::test]
    async fn test_download_failures_do_not_stop_the_crawl() {
        let downloader = Arc::new(StubDownloader::new(DownloaderKind::Static)
            .with_page("https://site.test/", r#"<a href="/missing">m</a><a href="/a">a</a>"#)
            .with_page("https://site.test/a", "<p>a</p>")
            .failing_on("https://site.test/missing"));
        let bus = bus_over(downloader.clone(), None, DispatchSettings::default());

        let summary = CrawlDriver::new(bus, &settings())
            .run(vec![TaskInfo::new("https://site.test/")])
            .await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retried, 0);
    }

    async fn run_on_busy_pool(max_retries: u32) -> CrawlSummary {
        let factory = FakeFactory::new();
        let pool = SessionPool::create(&factory, 1).await.unwrap();
        let downloader = Arc::new(StubDownloader::new(DownloaderKind::Dynamic)
            .with_delay(Duration::from_millis(100)));
        let dispatch = DispatchSettings {
            acquire_timeout: Duration::from_millis(30),
            ..DispatchSettings::default()
        };
        let bus = bus_over(downloader, Some(pool), dispatch);
        let settings = CrawlerSettings { concurrency: 2, max_retries, ..settings() };

        CrawlDriver::new(bus, &settings)
            .run(vec![
                TaskInfo::new("https://site.test/1").dynamic(true),
                TaskInfo::new("https://site.test/2").dynamic(true),
            ])
            .await
    }

    #[tokio::test]
    async fn test_pool_timeouts_are_retried() {
        let summary = run_on_busy_pool(10).await;

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.retried >= 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let summary = run_on_busy_pool(0).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retried, 0);
    }
}
