//! Replay-then-live view of throttle status

use futures::Stream;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::warn;

use super::ProtectionStatus;

/// A subscription to [`AttemptThrottle`](super::AttemptThrottle) status
///
/// The first value is the status at subscription time; every later value is
/// a change published by the throttle.
#[derive(Debug)]
pub struct StatusStream {
    replay: Option<ProtectionStatus>,
    rx: broadcast::Receiver<ProtectionStatus>,
}

impl StatusStream {
    pub(crate) fn new(current: ProtectionStatus, rx: broadcast::Receiver<ProtectionStatus>) -> Self {
        Self {
            replay: Some(current),
            rx,
        }
    }

    /// Wait for the next status; `None` once the throttle is gone
    pub async fn recv(&mut self) -> Option<ProtectionStatus> {
        if let Some(status) = self.replay.take() {
            return Some(status);
        }

        loop {
            match self.rx.recv().await {
                Ok(status) => return Some(status),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Status subscriber lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next status if one is already available
    pub fn try_recv(&mut self) -> Option<ProtectionStatus> {
        if let Some(status) = self.replay.take() {
            return Some(status);
        }

        loop {
            match self.rx.try_recv() {
                Ok(status) => return Some(status),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Status subscriber lagged, skipped {} updates", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every status currently available
    pub fn drain(&mut self) -> Vec<ProtectionStatus> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Adapt into a [`Stream`]
    pub fn into_stream(self) -> impl Stream<Item = ProtectionStatus> + Send + Unpin {
        Box::pin(futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|status| (status, stream))
        }))
    }
}
