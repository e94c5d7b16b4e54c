//! Persistence pipelines for accepted pages

pub mod jsonl;
pub mod log;
pub mod mongo;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use crate::cli::config::SinkSettings;
use crate::crawler::task::{ResultData, TaskDetails};

pub use jsonl::JsonLinesPipeline;
pub use log::LogPipeline;
pub use mongo::MongoPipeline;
pub use postgres::PostgresPipeline;

/// Sink for accepted pages
#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn save_to(&self, result: &ResultData, details: &TaskDetails) -> Result<()>;
}

/// Runs several pipelines in order
///
/// Every pipeline sees every result; the first error is reported after all
/// of them ran.
pub struct PipelineSet {
    pipelines: Vec<Arc<dyn Pipeline>>,
}

impl PipelineSet {
    pub fn new(pipelines: Vec<Arc<dyn Pipeline>>) -> Self {
        Self { pipelines }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[async_trait]
impl Pipeline for PipelineSet {
    fn name(&self) -> &str {
        "pipeline-set"
    }

    async fn save_to(&self, result: &ResultData, details: &TaskDetails) -> Result<()> {
        let mut first_error = None;

        for pipeline in &self.pipelines {
            if let Err(e) = pipeline.save_to(result, details).await {
                error!("Pipeline '{}' failed for {}: {:#}", pipeline.name(), result.url(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Create the configured pipelines
pub async fn create_pipelines(sinks: &[SinkSettings]) -> Result<Vec<Arc<dyn Pipeline>>> {
    let mut pipelines: Vec<Arc<dyn Pipeline>> = Vec::with_capacity(sinks.len());

    for sink in sinks {
        let pipeline: Arc<dyn Pipeline> = match sink {
            SinkSettings::Log => Arc::new(LogPipeline),
            SinkSettings::Jsonl { path } => Arc::new(JsonLinesPipeline::new(path.clone())),
            SinkSettings::Mongodb { connection_string, database_name, collection } => {
                Arc::new(MongoPipeline::new(connection_string, database_name, collection).await?)
            }
            SinkSettings::Postgresql { connection_string, schema_name, table_name } => {
                Arc::new(PostgresPipeline::new(connection_string, schema_name, table_name).await?)
            }
        };

        pipelines.push(pipeline);
    }

    Ok(pipelines)
}
