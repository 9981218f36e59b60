use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use metrics::counter;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::application::documents::state_key;
use crate::cache::{CacheKey, CacheStore};
use crate::domain::documents::{DocumentId, DocumentRefreshJobState, RefreshStatusEvent};

use super::channels::{RefreshChannelRegistry, RefreshListener};

const METRIC_REFRESH_STREAM_LAGGED: &str = "pinfall_refresh_stream_lagged_total";

/// Refresh events for one observer of `document`.
///
/// Subscribes immediately, then yields the last known state (if any)
/// followed by every event published after the subscription. A receiver that
/// lags drops whatever is still buffered and is resynchronised from the last
/// known state, so it never sees an older status after a newer one. Dropping
/// the stream releases the subscription.
pub fn status_stream(
    cache: CacheStore,
    channels: Arc<RefreshChannelRegistry>,
    document: DocumentId,
) -> impl Stream<Item = RefreshStatusEvent> + Send + 'static {
    let mut listener = channels.subscribe(&document);
    let key = state_key(&document);

    stream! {
        if let Some(state) = last_known_state(&cache, &key).await {
            yield state.event();
        }

        loop {
            match listener.recv().await {
                Ok(event) => yield event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(document = %listener.document(), skipped, "Refresh observer lagged");
                    counter!(METRIC_REFRESH_STREAM_LAGGED).increment(1);
                    let buffered = drain(&mut listener);
                    match last_known_state(&cache, &key).await {
                        Some(state) => yield state.event(),
                        None => {
                            if let Some(event) = buffered {
                                yield event;
                            }
                        }
                    }
                }
                Err(RecvError::Closed) => {
                    debug!(document = %listener.document(), "Refresh channel closed");
                    break;
                }
            }
        }
    }
}

/// Discard everything still buffered, keeping only the newest event.
fn drain(listener: &mut RefreshListener) -> Option<RefreshStatusEvent> {
    let mut newest = None;
    loop {
        match listener.try_recv() {
            Ok(event) => newest = Some(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return newest,
        }
    }
}

async fn last_known_state(cache: &CacheStore, key: &CacheKey) -> Option<DocumentRefreshJobState> {
    match cache.get(key).await {
        Ok(state) => state,
        Err(err) => {
            warn!(key = %key, error = %err, "Failed to read refresh state");
            None
        }
    }
}
