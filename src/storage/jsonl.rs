use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::crawler::task::{ResultData, TaskDetails};
use crate::storage::Pipeline;

/// Appends one JSON document per accepted page
pub struct JsonLinesPipeline {
    path: PathBuf,

    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesPipeline {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Pipeline for JsonLinesPipeline {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn save_to(&self, result: &ResultData, details: &TaskDetails) -> Result<()> {
        let record = json!({
            "url": result.url(),
            "route": details.route,
            "name": details.name,
            "description": details.description,
            "mime_type": result.content.mime_type,
            "status_code": result.content.status_code,
            "started_at": details.started_at,
            "finished_at": details.finished_at,
            "data": result.data,
            "content": result.raw_text(),
        });

        let mut line = serde_json::to_string(&record)
            .context("Failed to serialize result")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(format!("Failed to open {}", self.path.display()))?;

        file.write_all(line.as_bytes()).await
            .context(format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;

        debug!("Appended {} to {}", result.url(), self.path.display());

        Ok(())
    }
}
