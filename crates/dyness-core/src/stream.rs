// ── Snapshot subscriptions ──
//
// One message per publish. Slow subscribers skip what they missed and
// resume with the newest snapshot.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use crate::snapshot::Snapshot;

/// A subscription to published snapshots.
pub struct SnapshotStream {
    current: Option<Arc<Snapshot>>,
    receiver: broadcast::Receiver<Arc<Snapshot>>,
}

impl SnapshotStream {
    pub(crate) fn new(
        current: Option<Arc<Snapshot>>,
        receiver: broadcast::Receiver<Arc<Snapshot>>,
    ) -> Self {
        Self { current, receiver }
    }

    /// The snapshot that was published when the subscription was taken.
    pub fn current(&self) -> Option<&Arc<Snapshot>> {
        self.current.as_ref()
    }

    /// Wait for the next publish. `None` once the coordinator is gone.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => {
                    self.current = Some(Arc::clone(&snapshot));
                    return Some(snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "snapshot subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotBroadcastStream {
        SnapshotBroadcastStream {
            inner: BroadcastStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter over the publish channel.
pub struct SnapshotBroadcastStream {
    inner: BroadcastStream<Arc<Snapshot>>,
}

impl Stream for SnapshotBroadcastStream {
    type Item = Arc<Snapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(snapshot))) => return Poll::Ready(Some(snapshot)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(skipped, "snapshot stream lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
