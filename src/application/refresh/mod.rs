//! Document refresh pipeline.
//!
//! A [`DocumentRefresher`] runs each [`DocumentRefreshJob`], recording every
//! status transition in the cache and broadcasting it through the
//! [`RefreshChannelRegistry`]. Observers follow along with [`status_stream`].

mod channels;
mod job;
mod status;

pub use channels::{DEFAULT_CHANNEL_CAPACITY, RefreshChannelRegistry, RefreshListener};
pub use job::{DEFAULT_STATE_TTL, DocumentRefreshJob, DocumentRefresher, RefreshError};
pub use status::status_stream;
