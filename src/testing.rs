//! In-memory stand-ins for browsers, downloaders, processors and pipelines

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{BrowserSession, SessionFactory, SessionHandle};
use crate::crawler::page::PageHandle;
use crate::crawler::processor::PageProcessor;
use crate::crawler::task::{PageContent, ResultData, TargetRequest, TaskDetails, TaskDetailsBuilder, TaskInfo};
use crate::downloader::{DownloadError, Downloader, DownloaderKind};
use crate::storage::Pipeline;

/// Tracks how many calls are running at once
#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct FakeSession {
    html: String,
    fail_navigation: bool,
    fail_cleanup: bool,
    navigations: Mutex<Vec<String>>,
    cleanups: AtomicUsize,
    quits: AtomicUsize,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            html: "<html><body>fake</body></html>".to_string(),
            fail_navigation: false,
            fail_cleanup: false,
            navigations: Mutex::new(Vec::new()),
            cleanups: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn with_failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn with_failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn quit_count(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn has_quit(&self) -> bool {
        self.quit_count() > 0
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        if self.fail_navigation {
            return Err(anyhow!("navigation to {} refused", url));
        }
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn current_html(&self, _xpath_root: &str) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn close_extra_tabs(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(anyhow!("tab cleanup failed"));
        }
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type SessionMaker = Box<dyn Fn() -> FakeSession + Send + Sync>;

pub struct FakeFactory {
    make: SessionMaker,
    fail_after: Option<usize>,
    opened: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::with_session(FakeSession::new)
    }

    pub fn with_session(make: impl Fn() -> FakeSession + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            fail_after: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Opens `count` sessions, then fails
    pub fn failing_at(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::new()
        }
    }

    pub fn opened(&self) -> Vec<Arc<FakeSession>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> Result<Arc<dyn BrowserSession>> {
        let mut opened = self.opened.lock().unwrap();

        if self.fail_after == Some(opened.len()) {
            return Err(anyhow!("browser failed to start"));
        }

        let session = Arc::new((self.make)());
        opened.push(session.clone());
        Ok(session)
    }
}

const STUB_BODY: &str = "<html><body><p>stub page</p></body></html>";

/// Serves canned pages and records what it fetched
pub struct StubDownloader {
    kind: DownloaderKind,
    pages: HashMap<String, String>,
    failing_urls: Vec<String>,
    fail_all: bool,
    delegation: bool,
    delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
    last_headers: Mutex<HashMap<String, String>>,
    gauge: Gauge,
}

impl StubDownloader {
    pub fn new(kind: DownloaderKind) -> Self {
        Self {
            kind,
            pages: HashMap::new(),
            failing_urls: Vec::new(),
            fail_all: false,
            delegation: true,
            delay: None,
            fetched: Mutex::new(Vec::new()),
            last_headers: Mutex::new(HashMap::new()),
            gauge: Gauge::default(),
        }
    }

    pub fn with_page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing_urls.push(url.to_string());
        self
    }

    pub fn without_delegation(mut self) -> Self {
        self.delegation = false;
        self
    }

    /// Requested URLs in order; continuations show up as ""
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn last_headers(&self) -> HashMap<String, String> {
        self.last_headers.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    fn kind(&self) -> DownloaderKind {
        self.kind
    }

    async fn fetch(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        if self.kind == DownloaderKind::Dynamic && session.is_none() {
            return Err(DownloadError::MissingSession);
        }

        let url = request.url().unwrap_or_default().to_string();
        self.fetched.lock().unwrap().push(url.clone());
        *self.last_headers.lock().unwrap() = request.headers.clone();

        self.gauge.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.leave();

        if self.fail_all || self.failing_urls.contains(&url) {
            return Err(DownloadError::Browser(anyhow!("stub refused {}", url)));
        }

        let body = self.pages.get(&url).map(String::as_str).unwrap_or(STUB_BODY);
        Ok(PageContent::new(url, body, "text/html"))
    }

    async fn delegate_download(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        if !self.delegation {
            return Err(DownloadError::DelegationNotImplemented(self.kind));
        }
        self.fetch(request, session).await
    }

    fn supports_delegation(&self) -> bool {
        self.delegation
    }
}

type ProcessFn = Box<dyn Fn(&mut PageHandle) -> Result<PageContent> + Send + Sync>;

/// Processor backed by a closure
pub struct FnProcessor {
    process: ProcessFn,
}

impl FnProcessor {
    pub fn new(process: impl Fn(&mut PageHandle) -> Result<PageContent> + Send + Sync + 'static) -> Self {
        Self {
            process: Box::new(process),
        }
    }

    /// Returns the fetched content unchanged
    pub fn passthrough() -> Self {
        Self::new(|page| Ok(page.take_content()))
    }

    pub fn failing() -> Self {
        Self::new(|page| Err(anyhow!("cannot process {}", page.url())))
    }

    pub fn panicking() -> Self {
        Self::new(|_| -> Result<PageContent> { panic!("processor bug") })
    }
}

#[async_trait]
impl PageProcessor for FnProcessor {
    async fn process(&self, page: &mut PageHandle) -> Result<PageContent> {
        (self.process)(page)
    }
}

/// Remembers what it was asked to save
pub struct RecordingPipeline {
    saved: Mutex<Vec<String>>,
    fail: bool,
    delay: Option<Duration>,
    gauge: Gauge,
}

impl Default for RecordingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: false,
            delay: None,
            gauge: Gauge::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn saved_urls(&self) -> Vec<String> {
        self.saved.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }
}

#[async_trait]
impl Pipeline for RecordingPipeline {
    fn name(&self) -> &str {
        "recording"
    }

    async fn save_to(&self, result: &ResultData, _details: &TaskDetails) -> Result<()> {
        self.gauge.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.gauge.leave();

        self.saved.lock().unwrap().push(result.url().to_string());

        if self.fail {
            return Err(anyhow!("sink unavailable"));
        }
        Ok(())
    }
}

/// A persisted result with a `title` data field
pub fn sample_result(url: &str, body: &str) -> ResultData {
    let mut data = HashMap::new();
    data.insert("title".to_string(), Value::from("Sample"));

    ResultData {
        content: PageContent::new(url, body, "text/html"),
        task: TaskInfo::new(url),
        details: TaskDetailsBuilder::new("/", url, Utc::now()).name("sample").build(),
        data,
    }
}
