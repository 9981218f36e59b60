use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::application::refresh::{DocumentRefreshJob, DocumentRefresher};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

/// Accepts refresh jobs for background execution.
///
/// `enqueue` returns the job id as soon as the job is accepted; the outcome
/// is only observable through the refresh status channel and durable state.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: DocumentRefreshJob) -> Result<String, QueueError>;
}

/// Bounded in-process queue feeding a [`TaskWorker`].
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<DocumentRefreshJob>,
}

impl JobQueue for TaskQueue {
    fn enqueue(&self, job: DocumentRefreshJob) -> Result<String, QueueError> {
        let job_id = job.job_id.clone();
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        debug!(job_id = %job_id, "Job accepted");
        Ok(job_id)
    }
}

/// Drains a [`TaskQueue`], running at most `concurrency` jobs at once.
pub struct TaskWorker {
    receiver: mpsc::Receiver<DocumentRefreshJob>,
    refresher: Arc<DocumentRefresher>,
    permits: Arc<Semaphore>,
}

/// Build a queue holding up to `capacity` pending jobs and its worker.
pub fn task_queue(
    capacity: usize,
    concurrency: usize,
    refresher: Arc<DocumentRefresher>,
) -> (TaskQueue, TaskWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let worker = TaskWorker {
        receiver,
        refresher,
        permits: Arc::new(Semaphore::new(concurrency.max(1))),
    };
    (TaskQueue { sender }, worker)
}

impl TaskWorker {
    /// Run until every [`TaskQueue`] handle has been dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let refresher = Arc::clone(&self.refresher);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = refresher.run(&job).await {
                    warn!(job_id = %job.job_id, error = %err, "Refresh job failed");
                }
            });
        }
        info!("Job queue closed, worker stopping");
    }
}
