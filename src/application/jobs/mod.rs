mod context;
mod queue;
mod refresh_documents;

pub use context::{JobWorkerContext, job_failed};
pub use queue::{JobQueue, QueueError, TaskQueue, TaskWorker, task_queue};
pub use refresh_documents::{
    DEFAULT_REFRESH_SCHEDULE, ScheduleError, ScheduledRefresh, process_scheduled_refresh,
    refresh_schedule,
};
