//! Task dispatch
//!
//! [`DispatchBus::run_task`] takes one task through route resolution, fetch,
//! processing, deduplication and persistence, and hands back the follow-up
//! tasks. It never recurses; the caller decides what to run next.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::browser::{PoolError, SessionHandle, SessionPool};
use crate::crawler::page::{PageHandle, PageParts};
use crate::crawler::persist::PersistExecutor;
use crate::crawler::route::RouteRegistry;
use crate::crawler::task::{ResultData, TaskDetailsBuilder, TaskInfo};
use crate::downloader::{self, DownloadError};
use crate::utils::metrics::MetricsCollector;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: DownloadError,
    },

    #[error("Dispatch bus is shut down")]
    ShutDown,
}

impl DispatchError {
    /// Whether the same task may succeed if submitted again
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Pool(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// How long a dynamic task waits for a browser session
    pub acquire_timeout: Duration,

    /// Concurrent persistence jobs
    pub persist_workers: usize,

    /// Added to every request unless it sets the header itself
    pub default_headers: HashMap<String, String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            persist_workers: 4,
            default_headers: HashMap::new(),
        }
    }
}

pub struct DispatchBus {
    registry: Arc<RouteRegistry>,
    pool: Option<SessionPool>,
    settings: DispatchSettings,
    persist: PersistExecutor,
    metrics: MetricsCollector,
    closed: AtomicBool,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl DispatchBus {
    /// Must be called inside a tokio runtime
    pub fn new(registry: RouteRegistry, pool: Option<SessionPool>, settings: DispatchSettings, metrics: MetricsCollector) -> Self {
        let persist = PersistExecutor::new(settings.persist_workers, metrics.clone());

        Self {
            registry: Arc::new(registry),
            pool,
            settings,
            persist,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run one task and return its follow-ups
    pub async fn run_task(&self, mut task: TaskInfo) -> Result<Vec<TaskInfo>, DispatchError> {
        let carried = task.session_handle.take();

        if self.is_shut_down() {
            if let Some(handle) = carried {
                self.release(handle).await;
            }
            return Err(DispatchError::ShutDown);
        }

        let route = self.registry.resolve(task.route());
        self.metrics.record_task(&route.key).await;

        let Some(processor) = route.processor.clone() else {
            warn!("No processor for route '{}', skipping {}", route.key, task.url().unwrap_or("<continuation>"));
            if let Some(handle) = carried {
                self.release(handle).await;
            }
            self.metrics.record_skipped_route().await;
            return Ok(vec![]);
        };

        // A request without a URL only makes sense in the session it came from
        if task.url().is_none() && carried.is_none() {
            warn!("[{}] Task has neither a URL nor a session, dropping it", route.key);
            return Err(DispatchError::Download {
                url: String::new(),
                source: DownloadError::MissingUrl,
            });
        }

        self.apply_default_headers(&mut task);

        let (downloader, session) = match (&self.pool, task.is_dynamic) {
            (Some(pool), true) => {
                let handle = match carried {
                    Some(handle) => {
                        debug!("Continuing in session {}", handle.id());
                        handle
                    }
                    None => match pool.acquire(self.settings.acquire_timeout).await {
                        Ok(handle) => handle,
                        Err(e) => {
                            if matches!(e, PoolError::Timeout(_)) {
                                self.metrics.record_pool_timeout().await;
                            }
                            warn!("No browser session for {}: {}", task.url().unwrap_or("<continuation>"), e);
                            return Err(e.into());
                        }
                    },
                };
                (route.dynamic_downloader.clone(), Some(handle))
            }
            _ => {
                if task.is_dynamic {
                    debug!("No session pool, fetching {} statically", task.url().unwrap_or("<continuation>"));
                }
                if let Some(handle) = carried {
                    self.release(handle).await;
                }
                (route.static_downloader.clone(), None)
            }
        };

        let started_at = Utc::now();
        let timer = self.metrics.start_timer();
        let fetched = downloader::download(downloader.as_ref(), &task.request, session.as_ref()).await;
        let elapsed = timer.end();

        let mut content = match fetched {
            Ok(content) => {
                debug!("[{}] {} fetched {} in {} ms", route.key, downloader.kind(), content.url, elapsed);
                self.metrics.record_fetch(&route.key, true, elapsed, content.status_code, content.raw_text.len()).await;
                content
            }
            Err(e) => {
                self.metrics.record_fetch(&route.key, false, elapsed, None, 0).await;
                if let Some(handle) = session {
                    self.release(handle).await;
                }
                let url = task.url().unwrap_or_default().to_string();
                error!("[{}] {} download of {} failed: {}", route.key, downloader.kind(), url, e);
                return Err(DispatchError::Download { url, source: e });
            }
        };

        content.task_route_path = route.key.clone();
        if content.url.is_empty() {
            content.url = task.url().unwrap_or_default().to_string();
        }

        let mut page = PageHandle::new(content, session, downloader);

        let outcome = AssertUnwindSafe(processor.process(&mut page)).catch_unwind().await;

        let mut extracted = match outcome {
            Ok(Ok(extracted)) => extracted,
            Ok(Err(e)) => {
                error!("[{}] Processor failed on {}: {:#}", route.key, page.url(), e);
                self.abandon(page).await;
                return Ok(vec![]);
            }
            Err(panic) => {
                error!("[{}] Processor panicked on {}: {}", route.key, page.url(), panic_message(panic.as_ref()));
                self.abandon(page).await;
                return Ok(vec![]);
            }
        };

        let PageParts { tasks, data, session } = page.into_parts();
        if let Some(handle) = session {
            self.release(handle).await;
        }

        let mut follow_ups = std::mem::take(&mut extracted.next_tasks);
        follow_ups.extend(tasks);

        if extracted.task_route_path.is_empty() {
            extracted.task_route_path = route.key.clone();
        }
        if extracted.url.is_empty() {
            extracted.url = task.url().unwrap_or_default().to_string();
        }

        if route.scheduler.content_is_repeated(&extracted) {
            info!("[{}] Skipping near-duplicate content from {}", route.key, extracted.url);
            self.metrics.record_duplicate().await;
        } else if let Some(pipeline) = route.pipeline.clone() {
            let builder = TaskDetailsBuilder::new(route.key.as_str(), extracted.url.as_str(), started_at);
            let details = processor.describe_task_details(builder);

            let result = ResultData {
                content: extracted,
                task: task.detached(),
                details: details.clone(),
                data,
            };

            self.persist.submit(pipeline, result, details).await;
        } else {
            debug!("[{}] No pipeline, not persisting {}", route.key, extracted.url);
        }

        Ok(follow_ups)
    }

    /// Whether the task's URL was already seen by its route's scheduler
    ///
    /// Records the URL when it is new. Continuations have no URL and are
    /// never repeated.
    pub fn url_is_repeated(&self, task: &TaskInfo) -> bool {
        match task.url() {
            Some(url) => self.registry.resolve(task.route()).scheduler.url_is_repeated(url),
            None => false,
        }
    }

    /// Drain persistence, close the session pool and clear every scheduler
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down dispatch bus");

        self.persist.shutdown().await;

        if let Some(pool) = &self.pool {
            pool.close().await;
        }

        for scheduler in self.registry.schedulers() {
            scheduler.close();
        }
    }

    fn apply_default_headers(&self, task: &mut TaskInfo) {
        for (name, value) in &self.settings.default_headers {
            let present = task.request.headers.keys().any(|key| key.eq_ignore_ascii_case(name));
            if !present {
                task.request.headers.insert(name.clone(), value.clone());
            }
        }
    }

    async fn release(&self, handle: SessionHandle) {
        match &self.pool {
            Some(pool) => pool.release(handle).await,
            None => drop(handle),
        }
    }

    /// Release every session a failed page still holds
    async fn abandon(&self, page: PageHandle) {
        self.metrics.record_processor_failure().await;

        for handle in page.into_sessions() {
            self.release(handle).await;
        }
    }
}
