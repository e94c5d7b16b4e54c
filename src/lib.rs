//! Route-based crawl dispatch
//!
//! Tasks are routed to a processor, fetched over HTTP or in a pooled browser
//! session, deduplicated by SimHash and handed to persistence pipelines.

pub mod browser;
pub mod cli;
pub mod crawler;
pub mod downloader;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
