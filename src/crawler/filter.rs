use std::collections::HashSet;
use regex::Regex;
use thiserror::Error;
use url::Url;
use tracing::warn;

use crate::cli::config::CrawlerSettings;

/// Why a discovered URL was not enqueued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("not a valid absolute URL")]
    Invalid,

    #[error("unsupported scheme '{0}'")]
    Scheme(String),

    #[error("host '{0}' is not an allowed domain")]
    Domain(String),

    #[error("matches exclude pattern '{0}'")]
    Excluded(String),

    #[error("matches no include pattern")]
    NotIncluded,
}

/// Decides which discovered URLs the driver should enqueue
///
/// An empty domain list or include list places no restriction.
pub struct UrlFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    domains: HashSet<String>,
}

fn compile_all(patterns: &[String], kind: &str) -> Vec<Regex> {
    let mut compiled = Vec::with_capacity(patterns.len());

    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(regex) => compiled.push(regex),
            Err(e) => warn!("Ignoring invalid {} pattern '{}': {}", kind, pattern, e),
        }
    }

    compiled
}

/// `host` equals `domain` or is one of its subdomains
fn within_domain(host: &str, domain: &str) -> bool {
    host == domain
        || host.strip_suffix(domain).is_some_and(|prefix| prefix.ends_with('.'))
}

impl UrlFilter {
    pub fn new(settings: &CrawlerSettings) -> Self {
        Self {
            include: compile_all(&settings.url_patterns.include, "include"),
            exclude: compile_all(&settings.url_patterns.exclude, "exclude"),
            domains: settings.allowed_domains.iter()
                .map(|domain| domain.trim().to_ascii_lowercase())
                .filter(|domain| !domain.is_empty())
                .collect(),
        }
    }

    /// Check a URL against scheme, domain and pattern rules, in that order
    pub fn check(&self, url: &str) -> Result<(), Rejection> {
        let normalized = normalize_url(url);
        let parsed = Url::parse(&normalized).map_err(|_| Rejection::Invalid)?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Rejection::Scheme(parsed.scheme().to_string()));
        }

        if !self.domains.is_empty() {
            let host = parsed.host_str().unwrap_or_default();
            if !self.domains.iter().any(|domain| within_domain(host, domain)) {
                return Err(Rejection::Domain(host.to_string()));
            }
        }

        if let Some(pattern) = self.exclude.iter().find(|pattern| pattern.is_match(&normalized)) {
            return Err(Rejection::Excluded(pattern.as_str().to_string()));
        }

        if !self.include.is_empty() && !self.include.iter().any(|pattern| pattern.is_match(&normalized)) {
            return Err(Rejection::NotIncluded);
        }

        Ok(())
    }

    pub fn allows(&self, url: &str) -> bool {
        self.check(url).is_ok()
    }
}

/// Canonical form used for seen-URL bookkeeping
///
/// Lowercases the host, drops default ports and the fragment, and sorts
/// query pairs. Input that does not parse is returned as given.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url.trim()) else {
        return url.to_string();
    };

    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    parsed.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::UrlPatterns;

    fn news_site() -> UrlFilter {
        UrlFilter::new(&CrawlerSettings {
            allowed_domains: vec!["News.test".to_string()],
            url_patterns: UrlPatterns {
                include: vec![r"/(articles|sections)/".to_string()],
                exclude: vec![r"\.(png|jpe?g|pdf)$".to_string(), "(".to_string()],
            },
            ..CrawlerSettings::default()
        })
    }

    #[test]
    fn test_check_reasons() {
        let filter = news_site();

        assert_eq!(filter.check("https://news.test/articles/1"), Ok(()));
        assert_eq!(filter.check("https://m.news.test/sections/world"), Ok(()));

        assert_eq!(filter.check("/articles/1"), Err(Rejection::Invalid));
        assert_eq!(filter.check("ftp://news.test/articles/1"), Err(Rejection::Scheme("ftp".into())));
        assert_eq!(filter.check("https://fakenews.test/articles/1"), Err(Rejection::Domain("fakenews.test".into())));
        assert!(matches!(filter.check("https://news.test/articles/cover.jpg"), Err(Rejection::Excluded(_))));
        assert_eq!(filter.check("https://news.test/about"), Err(Rejection::NotIncluded));
    }

    #[test]
    fn test_default_settings_allow_any_web_url() {
        let filter = UrlFilter::new(&CrawlerSettings::default());

        assert!(filter.allows("http://anything.test/x?y=1"));
        assert!(!filter.allows("mailto:someone@anything.test"));
    }

    #[test]
    fn test_within_domain() {
        assert!(within_domain("news.test", "news.test"));
        assert!(within_domain("a.b.news.test", "news.test"));
        assert!(!within_domain("badnews.test", "news.test"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(" HTTPS://Shop.TEST:443/cart?b=2&a=1#top "), "https://shop.test/cart?a=1&b=2");
        assert_eq!(normalize_url("http://shop.test:8080/?"), "http://shop.test:8080/");
        assert_eq!(normalize_url("relative/path"), "relative/path");
    }
}
