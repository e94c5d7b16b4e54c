use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::crawler::page::PageHandle;
use crate::crawler::task::{PageContent, TaskDetails, TaskDetailsBuilder, TaskInfo};

/// Route-specific page handling
#[async_trait]
pub trait PageProcessor: Send + Sync {
    /// Extract the content to persist and queue follow-ups on the page
    async fn process(&self, page: &mut PageHandle) -> Result<PageContent>;

    /// Completion metadata attached to the persisted result
    fn describe_task_details(&self, builder: TaskDetailsBuilder) -> TaskDetails {
        builder.build()
    }
}

/// Follows every link on an HTML page
///
/// Follow-ups stay on the page's route and fetch mode. The page title goes
/// into the `title` data field.
#[derive(Debug, Default, Clone)]
pub struct LinkProcessor;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {}: {:?}", css, e))
}

/// Absolute http(s) links of a document, in document order without repeats
pub fn extract_links(html: &str, base_url: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let anchors = selector("a[href]")?;
    let base = Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&anchors) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        let resolved = match &base {
            Some(base) => base.join(href.trim()),
            None => Url::parse(href.trim()),
        };

        let Ok(mut link) = resolved else {
            continue;
        };

        if link.scheme() != "http" && link.scheme() != "https" {
            continue;
        }

        link.set_fragment(None);
        let link = link.to_string();

        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    Ok(links)
}

/// Trimmed text of the first `<title>`
pub fn extract_title(html: &str) -> Result<Option<String>> {
    let document = Html::parse_document(html);
    let title = selector("title")?;

    Ok(document.select(&title)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty()))
}

#[async_trait]
impl PageProcessor for LinkProcessor {
    async fn process(&self, page: &mut PageHandle) -> Result<PageContent> {
        if !page.content().is_html() {
            debug!("Skipping link extraction for non-HTML page {}", page.url());
            return Ok(page.take_content());
        }

        let links = extract_links(&page.content().raw_text, page.url())?;
        let title = extract_title(&page.content().raw_text)?;

        debug!("Found {} links on {}", links.len(), page.url());

        let route = page.route().to_string();
        let dynamic = page.is_dynamic();

        page.insert_data("links", &links);
        if let Some(title) = title {
            page.insert_data("title", title);
        }

        for link in links {
            page.add_task(TaskInfo::new(link).with_route(route.as_str()).dynamic(dynamic));
        }

        Ok(page.take_content())
    }

    fn describe_task_details(&self, builder: TaskDetailsBuilder) -> TaskDetails {
        builder
            .name("links")
            .description("Follow every link on the page")
            .build()
    }
}
