use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

use crate::browser::SessionHandle;
use crate::cli::config::HttpSettings;
use crate::crawler::task::{HttpMethod, PageContent, TargetRequest};
use crate::downloader::{DownloadError, Downloader, DownloaderKind};

/// Plain HTTP downloader
pub struct StaticDownloader {
    client: Client,
}

impl StaticDownloader {
    /// Build a downloader with its own HTTP client
    pub fn new(settings: &HttpSettings) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }

    /// Use an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}

#[async_trait]
impl Downloader for StaticDownloader {
    fn kind(&self) -> DownloaderKind {
        DownloaderKind::Static
    }

    async fn fetch(&self, request: &TargetRequest, _session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        let url = request.url().ok_or(DownloadError::MissingUrl)?;

        let mut builder = self.client.request(to_method(request.method), url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let mime_type = response.headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response.bytes().await?;

        debug!("Fetched {} {} ({} bytes, status {})", request.method.as_str(), url, body.len(), status);

        let mut content = PageContent::new(url, String::from_utf8_lossy(&body), mime_type);
        content.status_code = Some(status);

        Ok(content)
    }

    async fn delegate_download(&self, request: &TargetRequest, session: Option<&SessionHandle>) -> Result<PageContent, DownloadError> {
        self.fetch(request, session).await
    }

    fn supports_delegation(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader() -> StaticDownloader {
        StaticDownloader::new(&HttpSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_wraps_body_and_content_type() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200)
                .set_body_raw("<html><body>Hello</body></html>", "text/html; charset=utf-8"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/page", mock_server.uri());
        let content = downloader().fetch(&TargetRequest::new(&url), None).await.unwrap();

        assert_eq!(content.url, url);
        assert_eq!(content.mime_type, "text/html; charset=utf-8");
        assert_eq!(content.raw_text, "<html><body>Hello</body></html>");
        assert_eq!(content.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_fetch_sends_method_headers_and_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("x-crawl", "yes"))
            .and(body_string("q=rust"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = TargetRequest::new(format!("{}/search", mock_server.uri()))
            .with_method(HttpMethod::Post)
            .with_header("x-crawl", "yes")
            .with_body("q=rust");

        let content = downloader().fetch(&request, None).await.unwrap();

        assert_eq!(content.status_code, Some(201));
        assert_eq!(content.raw_text, "created");
    }

    #[tokio::test]
    async fn test_fetch_without_url_fails() {
        let result = downloader().fetch(&TargetRequest::continuation(), None).await;
        assert!(matches!(result, Err(DownloadError::MissingUrl)));
    }

    #[tokio::test]
    async fn test_delegation_forwards_to_fetch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("delegated"))
            .mount(&mock_server)
            .await;

        let downloader = downloader();
        let content = downloader
            .delegate_download(&TargetRequest::new(mock_server.uri()), None)
            .await
            .unwrap();

        assert!(downloader.supports_delegation());
        assert_eq!(content.raw_text, "delegated");
    }
}
