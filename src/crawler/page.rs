use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::browser::SessionHandle;
use crate::crawler::task::{PageContent, TargetRequest, TaskInfo};
use crate::downloader::{DownloadError, Downloader, DownloaderKind};

/// A fetched page as seen by its processor
///
/// Holds the downloader that produced the page, so the processor can issue
/// delegated requests, and the browser session of a dynamic fetch.
pub struct PageHandle {
    content: PageContent,
    session: Option<SessionHandle>,
    downloader: Arc<dyn Downloader>,
    tasks: Vec<TaskInfo>,
    data: HashMap<String, Value>,
}

/// What is left of a page once its processor returned
pub struct PageParts {
    pub tasks: Vec<TaskInfo>,
    pub data: HashMap<String, Value>,
    pub session: Option<SessionHandle>,
}

impl PageHandle {
    pub fn new(content: PageContent, session: Option<SessionHandle>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            content,
            session,
            downloader,
            tasks: Vec::new(),
            data: HashMap::new(),
        }
    }

    pub fn content(&self) -> &PageContent {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut PageContent {
        &mut self.content
    }

    /// Move the content out, leaving an empty page behind
    pub fn take_content(&mut self) -> PageContent {
        std::mem::take(&mut self.content)
    }

    pub fn url(&self) -> &str {
        &self.content.url
    }

    /// Route that dispatched this page
    pub fn route(&self) -> &str {
        &self.content.task_route_path
    }

    /// Whether the page was rendered in a browser
    pub fn is_dynamic(&self) -> bool {
        self.downloader.kind() == DownloaderKind::Dynamic
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Queue a follow-up task
    pub fn add_task(&mut self, task: TaskInfo) {
        self.tasks.push(task);
    }

    /// Queue a follow-up that keeps working in this page's browser session
    ///
    /// The session moves into the task and is no longer released with the page.
    pub fn continue_with(&mut self, mut task: TaskInfo) {
        match self.session.take() {
            Some(session) => {
                task.session_handle = Some(session);
                task.is_dynamic = true;
            }
            None => warn!("No session to continue with on {}, queuing a plain task", self.content.url),
        }

        self.tasks.push(task);
    }

    /// Fetch another request through the downloader that produced this page
    pub async fn delegate(&self, request: &TargetRequest) -> Result<PageContent, DownloadError> {
        self.downloader.delegate_download(request, self.session.as_ref()).await
    }

    /// Attach a value to the persisted result
    pub fn insert_data(&mut self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key, value);
            }
            Err(e) => warn!("Could not store data field '{}': {}", key, e),
        }
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn tasks(&self) -> &[TaskInfo] {
        &self.tasks
    }

    pub fn into_parts(self) -> PageParts {
        PageParts {
            tasks: self.tasks,
            data: self.data,
            session: self.session,
        }
    }

    /// Every session reachable from this page, including ones moved into follow-ups
    pub fn into_sessions(self) -> Vec<SessionHandle> {
        let mut sessions: Vec<SessionHandle> = self.tasks.into_iter()
            .filter_map(|task| task.session_handle)
            .collect();
        sessions.extend(self.session);
        sessions
    }
}
