use async_trait::async_trait;
use tracing::debug;

use crate::browser::SessionHandle;
use crate::cli::config::BrowserSettings;
use crate::crawler::task::{PageContent, TargetRequest};
use crate::downloader::{DownloadError, Downloader, DownloaderKind};

const BLANK_PAGE: &str = "about:blank";

/// Downloader that renders pages in a pooled browser session
pub struct DynamicDownloader {
    /// XPath of the element whose HTML becomes the page content
    root_xpath: String,

    /// Navigate to a blank page before each fresh navigation
    reset_to_blank: bool,
}

impl Default for DynamicDownloader {
    fn default() -> Self {
        Self {
            root_xpath: "/html".to_string(),
            reset_to_blank: false,
        }
    }
}

impl DynamicDownloader {
    pub fn new(root_xpath: impl Into<String>, reset_to_blank: bool) -> Self {
        Self {
            root_xpath: root_xpath.into(),
            reset_to_blank,
        }
    }

    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self::new(settings.root_xpath.clone(), settings.reset_to_blank)
    }
}

#[async_trait]
impl Downloader for DynamicDownloader {
    fn kind(&self) -> DownloaderKind {
        DownloaderKind::Dynamic
    }

    async fn pre_process(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<(), DownloadError> {
        let handle = session.ok_or(DownloadError::MissingSession)?;

        if self.reset_to_blank && request.url().is_some() {
            handle.session().navigate(BLANK_PAGE).await
                .map_err(DownloadError::Browser)?;
        }

        Ok(())
    }

    async fn fetch(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        let handle = session.ok_or(DownloadError::MissingSession)?;
        let browser = handle.session();

        match request.url() {
            Some(url) => {
                browser.navigate(url).await
                    .map_err(DownloadError::Browser)?;
            }
            None => debug!("No URL on request, continuing on the current page of session {}", handle.id()),
        }

        let html = browser.current_html(&self.root_xpath).await
            .map_err(DownloadError::Browser)?;

        debug!("Rendered {} bytes in session {}", html.len(), handle.id());

        Ok(PageContent::new(request.url().unwrap_or_default(), html, "text/html"))
    }

    async fn delegate_download(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        self.fetch(request, session).await
    }

    fn supports_delegation(&self) -> bool {
        true
    }
}
