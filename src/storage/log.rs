use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::crawler::task::{ResultData, TaskDetails};
use crate::storage::Pipeline;

/// Logs one line per accepted page
pub struct LogPipeline;

#[async_trait]
impl Pipeline for LogPipeline {
    fn name(&self) -> &str {
        "log"
    }

    async fn save_to(&self, result: &ResultData, details: &TaskDetails) -> Result<()> {
        let elapsed = details.finished_at - details.started_at;

        info!(
            "[{}] {} {} bytes, {} data fields, {} ms",
            details.name,
            result.url(),
            result.raw_text().len(),
            result.data.len(),
            elapsed.num_milliseconds()
        );

        Ok(())
    }
}
