//! Cron job that refreshes every catalog document.

use std::str::FromStr;

use apalis::prelude::{Data, Error as ApalisError};
use apalis_cron::Schedule;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::refresh::DocumentRefreshJob;
use crate::domain::documents::TriggeredBy;

use super::context::{JobWorkerContext, job_failed};
use super::queue::QueueError;

/// Daily at 03:00 UTC. Seconds-first, as the `cron` crate expects.
pub const DEFAULT_REFRESH_SCHEDULE: &str = "0 0 3 * * *";

/// Tick emitted by the cron stream.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct ScheduledRefresh;

impl From<chrono::DateTime<chrono::Utc>> for ScheduledRefresh {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Debug, Error)]
#[error("invalid cron expression `{expression}`: {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

pub fn refresh_schedule(expression: &str) -> Result<Schedule, ScheduleError> {
    Schedule::from_str(expression).map_err(|err| ScheduleError {
        expression: expression.to_string(),
        reason: err.to_string(),
    })
}

/// Enqueue a scheduled refresh for each document in the catalog.
///
/// Every document is attempted; the first enqueue failure is reported after
/// the rest have been tried.
pub async fn process_scheduled_refresh(
    _tick: ScheduledRefresh,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let mut first_error: Option<QueueError> = None;
    let mut enqueued = 0usize;

    for document in ctx.catalog.iter() {
        let job = DocumentRefreshJob::new(document, TriggeredBy::Scheduled);
        match ctx.queue.enqueue(job) {
            Ok(job_id) => {
                enqueued += 1;
                info!(document = %document.id, job_id = %job_id, "Scheduled refresh enqueued");
            }
            Err(err) => {
                warn!(document = %document.id, error = %err, "Failed to enqueue scheduled refresh");
                first_error.get_or_insert(err);
            }
        }
    }

    info!(enqueued, total = ctx.catalog.len(), "Scheduled refresh pass finished");

    match first_error {
        Some(err) => Err(job_failed(err)),
        None => Ok(()),
    }
}
