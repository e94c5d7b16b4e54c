//! Page downloaders
//!
//! A downloader turns a [`TargetRequest`] into [`PageContent`] in three strictly
//! ordered phases: `pre_process`, `fetch`, `post_process`. The static variant
//! talks HTTP directly; the dynamic variant drives a pooled browser session.

pub mod dynamic;
pub mod http;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::browser::SessionHandle;
use crate::crawler::task::{PageContent, TargetRequest};

pub use dynamic::DynamicDownloader;
pub use http::StaticDownloader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderKind {
    Static,
    Dynamic,
}

impl fmt::Display for DownloaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloaderKind::Static => write!(f, "static"),
            DownloaderKind::Dynamic => write!(f, "dynamic"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request has no URL")]
    MissingUrl,

    #[error("Dynamic download requires a browser session")]
    MissingSession,

    #[error("Browser session error: {0:#}")]
    Browser(anyhow::Error),

    #[error("The {0} downloader does not implement delegated downloads")]
    DelegationNotImplemented(DownloaderKind),
}

#[async_trait]
pub trait Downloader: Send + Sync {
    fn kind(&self) -> DownloaderKind;

    /// Setup before the fetch
    async fn pre_process(&self, _request: &TargetRequest, _session: Option<&SessionHandle>) -> Result<(), DownloadError> {
        Ok(())
    }

    async fn fetch(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<PageContent, DownloadError>;

    /// Teardown after the fetch, run even when the fetch failed
    async fn post_process(&self, _request: &TargetRequest, _session: Option<&SessionHandle>) -> Result<(), DownloadError> {
        Ok(())
    }

    /// Handle a request on behalf of a caller that does not know which kind
    /// of downloader it holds
    async fn delegate_download(&self, _request: &TargetRequest, _session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        Err(DownloadError::DelegationNotImplemented(self.kind()))
    }

    /// Must return true whenever `delegate_download` is overridden
    fn supports_delegation(&self) -> bool {
        false
    }
}

/// Run `pre_process`, `fetch` and `post_process` in order
pub async fn download(
    downloader: &dyn Downloader,
    request: &TargetRequest,
    session: Option<&SessionHandle>,
) -> Result<PageContent, DownloadError> {
    downloader.pre_process(request, session).await?;

    let fetched = downloader.fetch(request, session).await;
    let finished = downloader.post_process(request, session).await;

    let content = fetched?;
    finished?;

    Ok(content)
}
