//! Outbound request queue and inbound update sequence.
//!
//! Both queues are unbounded tokio channels owned by the client instance, so
//! they survive every reconnect of the underlying stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};

use crate::stream::client::GeyserClientError;
use crate::stream::proto::{SubscribeRequest, SubscribeUpdate};

/// Cloneable producer handle for the outbound request queue.
#[derive(Clone, Debug)]
pub struct SubscriptionSender {
    tx: mpsc::UnboundedSender<SubscribeRequest>,
}

impl SubscriptionSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SubscribeRequest>) -> Self {
        Self { tx }
    }

    /// Appends a request to the queue. Never blocks.
    ///
    /// The request is transmitted on the next active session. Delivery is
    /// best effort: a request handed to a session that fails is not retried.
    pub fn send(&self, request: SubscribeRequest) -> Result<(), GeyserClientError> {
        self.tx
            .send(request)
            .map_err(|_| GeyserClientError::SendQueueClosed)
    }
}

pub(crate) type SharedUpdateReceiver = Arc<Mutex<mpsc::UnboundedReceiver<SubscribeUpdate>>>;

/// Continuous sequence of updates received across all stream sessions.
///
/// The sequence never ends while the owning client is alive. It is meant for
/// a single consumer; fan-out is left to the caller.
pub struct UpdateStream {
    inner: BoxStream<'static, SubscribeUpdate>,
}

impl UpdateStream {
    pub(crate) fn new(rx: SharedUpdateReceiver) -> Self {
        let inner = stream::unfold(rx, |rx| async move {
            let next = rx.lock().await.recv().await;
            next.map(|update| (update, rx))
        })
        .boxed();
        Self { inner }
    }

    /// Waits for the next update.
    pub async fn recv(&mut self) -> Option<SubscribeUpdate> {
        self.inner.next().await
    }
}

impl Stream for UpdateStream {
    type Item = SubscribeUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for UpdateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStream").finish_non_exhaustive()
    }
}
