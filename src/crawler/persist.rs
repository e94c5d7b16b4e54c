use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::crawler::task::{ResultData, TaskDetails};
use crate::storage::Pipeline;
use crate::utils::metrics::MetricsCollector;

struct PersistJob {
    pipeline: Arc<dyn Pipeline>,
    result: ResultData,
    details: TaskDetails,
}

/// Fire-and-forget persistence on a bounded number of workers
///
/// Submissions go onto an unbounded queue; a dispatcher runs at most
/// `workers` pipeline calls at a time.
pub struct PersistExecutor {
    sender: Mutex<Option<mpsc::UnboundedSender<PersistJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PersistExecutor {
    pub fn new(workers: usize, metrics: MetricsCollector) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(receiver, workers.max(1), metrics));

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a result; returns false once the executor is shut down
    pub async fn submit(&self, pipeline: Arc<dyn Pipeline>, result: ResultData, details: TaskDetails) -> bool {
        let guard = self.sender.lock().await;

        let Some(sender) = guard.as_ref() else {
            warn!("Persistence is shut down, dropping {}", result.url());
            return false;
        };

        sender.send(PersistJob { pipeline, result, details }).is_ok()
    }

    /// Stop intake and wait for every queued job to finish
    pub async fn shutdown(&self) {
        drop(self.sender.lock().await.take());

        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                error!("Persistence dispatcher failed: {}", e);
            }
        }
    }
}

async fn dispatch(mut receiver: mpsc::UnboundedReceiver<PersistJob>, workers: usize, metrics: MetricsCollector) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let metrics = metrics.clone();

        tasks.spawn(async move {
            let url = job.result.url().to_string();

            match job.pipeline.save_to(&job.result, &job.details).await {
                Ok(()) => {
                    debug!("Pipeline '{}' saved {}", job.pipeline.name(), url);
                    metrics.record_persisted(true).await;
                }
                Err(e) => {
                    error!("Pipeline '{}' failed to save {}: {:#}", job.pipeline.name(), url, e);
                    metrics.record_persisted(false).await;
                }
            }

            drop(permit);
        });

        // Reap finished jobs so the set does not grow with the crawl
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!("Persistence job panicked: {}", e);
            }
        }
    }

    while let Some(finished) = tasks.join_next().await {
        if let Err(e) = finished {
            error!("Persistence job panicked: {}", e);
        }
    }

    debug!("Persistence dispatcher finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_result, RecordingPipeline};
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let metrics = MetricsCollector::new();
        let executor = PersistExecutor::new(2, metrics.clone());
        let pipeline = Arc::new(RecordingPipeline::new().with_delay(Duration::from_millis(10)));

        for i in 0..5 {
            let result = sample_result(&format!("https://a.test/{}", i), "body");
            let details = result.details.clone();
            assert!(executor.submit(pipeline.clone(), result, details).await);
        }

        executor.shutdown().await;

        assert_eq!(pipeline.saved_urls().len(), 5);
        assert!(pipeline.peak_concurrency() <= 2);
        assert_eq!(metrics.get_metrics().await.persisted, 5);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_refused() {
        let executor = PersistExecutor::new(1, MetricsCollector::new());
        executor.shutdown().await;

        let result = sample_result("https://a.test/", "body");
        let details = result.details.clone();
        assert!(!executor.submit(Arc::new(RecordingPipeline::new()), result, details).await);

        // Double shutdown is harmless
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let metrics = MetricsCollector::new();
        let executor = PersistExecutor::new(1, metrics.clone());

        let result = sample_result("https://a.test/", "body");
        let details = result.details.clone();
        executor.submit(Arc::new(RecordingPipeline::failing()), result, details).await;
        executor.shutdown().await;

        assert_eq!(metrics.get_metrics().await.persist_failures, 1);
    }
}
