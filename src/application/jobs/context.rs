use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::application::documents::DocumentCatalog;

use super::queue::JobQueue;

/// Shared context passed to the scheduled refresh worker.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub catalog: Arc<DocumentCatalog>,
    pub queue: Arc<dyn JobQueue>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
