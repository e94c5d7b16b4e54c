use anyhow::{Result, Context};
use async_trait::async_trait;
use thirtyfour::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::cli::config::BrowserSettings;

/// A live browser-automation session
///
/// The pool only needs navigation, HTML extraction and lifecycle; everything
/// else a processor wants to do with the page goes through the concrete type.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the session to a URL
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Outer HTML of the element found at `xpath_root`
    async fn current_html(&self, xpath_root: &str) -> Result<String>;

    /// Close every tab except the first one
    async fn close_extra_tabs(&self) -> Result<()>;

    /// Terminate the underlying browser
    async fn quit(&self) -> Result<()>;
}

/// Opens new browser sessions for the pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn BrowserSession>>;
}

/// WebDriver-backed browser session
pub struct WebDriverSession {
    /// WebDriver instance, taken on quit
    driver: Mutex<Option<WebDriver>>,
}

impl WebDriverSession {
    /// Connect to a WebDriver server and start a browser
    pub async fn connect(config: &BrowserSettings) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();

        caps.add_chrome_arg(&format!("--window-size={},{}", config.viewport.width, config.viewport.height))?;

        if let Some(user_agent) = &config.user_agent {
            caps.add_chrome_arg(&format!("--user-agent={}", user_agent))?;
        }

        if config.headless {
            caps.set_headless()?;
        }

        caps.add_chrome_arg("--disable-dev-shm-usage")?;

        let driver = WebDriver::new(&config.webdriver_url, caps).await
            .context(format!("Failed to connect to WebDriver at {}", config.webdriver_url))?;

        driver.set_page_load_timeout(Duration::from_secs(config.page_load_timeout_secs)).await?;

        debug!("Browser session started against {}", config.webdriver_url);

        Ok(Self {
            driver: Mutex::new(Some(driver)),
        })
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        let guard = self.driver.lock().await;
        let driver = guard.as_ref()
            .context("Browser session already closed")?;

        debug!("Navigating to: {}", url);
        driver.goto(url).await
            .context(format!("Failed to navigate to URL: {}", url))?;

        Ok(())
    }

    async fn current_html(&self, xpath_root: &str) -> Result<String> {
        let guard = self.driver.lock().await;
        let driver = guard.as_ref()
            .context("Browser session already closed")?;

        let root = driver.find(By::XPath(xpath_root)).await
            .context(format!("Element not found: {}", xpath_root))?;

        let html = root.outer_html().await
            .context("Failed to read page HTML")?;

        Ok(html)
    }

    async fn close_extra_tabs(&self) -> Result<()> {
        let guard = self.driver.lock().await;
        let driver = guard.as_ref()
            .context("Browser session already closed")?;

        let windows = driver.windows().await
            .context("Failed to list browser windows")?;

        let Some((first, extra)) = windows.split_first() else {
            return Ok(());
        };

        for window in extra {
            driver.switch_to_window(window.clone()).await?;
            driver.close_window().await?;
        }

        if !extra.is_empty() {
            driver.switch_to_window(first.clone()).await?;
            debug!("Closed {} extra tabs", extra.len());
        }

        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        if let Some(driver) = self.driver.lock().await.take() {
            driver.quit().await
                .context("Failed to quit browser session")?;
            debug!("Browser session closed");
        }

        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            // Spawn a task to quit the driver
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = driver.quit().await {
                        error!("Error closing browser session during drop: {}", e);
                    }
                });
            }
        }
    }
}

/// Factory producing WebDriver sessions from the browser settings
pub struct WebDriverFactory {
    config: BrowserSettings,
}

impl WebDriverFactory {
    pub fn new(config: BrowserSettings) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self) -> Result<Arc<dyn BrowserSession>> {
        let session = WebDriverSession::connect(&self.config).await?;
        Ok(Arc::new(session))
    }
}
