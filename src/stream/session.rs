//! A single live subscribe call.
//!
//! A session borrows the client's queues for its lifetime: it pulls requests
//! from the outbound queue only once the call is open, and pushes every
//! received update into the inbound queue in arrival order. Every way a
//! session can end is a [`SessionError`]; the driver decides what happens next.

use futures_util::stream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::stream::client::ConnectionState;
use crate::stream::proto::{update_kind, Status, SubscribeRequest, SubscribeUpdate};
use crate::transport::{GeyserTransport, RequestStream, TransportError};

/// Reason a session stopped.
#[derive(Debug, Error)]
pub(crate) enum SessionError {
    /// The subscribe call could not be opened.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// The response stream yielded an error status.
    #[error("stream error: {0}")]
    Status(#[source] Status),

    /// The server ended the response stream.
    #[error("server closed the stream")]
    ServerClosed,

    /// The transport stopped reading the request side of the call.
    #[error("request stream closed by transport")]
    RequestStreamClosed,
}

impl SessionError {
    /// Whether the session reached the active state before ending.
    pub(crate) fn was_active(&self) -> bool {
        !matches!(self, SessionError::Connect(_))
    }
}

/// Queues and state shared with the driver for the duration of a session.
pub(crate) struct SessionContext<'a> {
    pub(crate) session_id: u64,
    pub(crate) outbound_rx: &'a mut mpsc::UnboundedReceiver<SubscribeRequest>,
    pub(crate) inbound_tx: &'a mpsc::UnboundedSender<SubscribeUpdate>,
    pub(crate) state_tx: &'a watch::Sender<ConnectionState>,
}

/// Runs one session until it fails.
///
/// Request and response halves are dropped before this returns, so the
/// underlying call is torn down by the time the driver opens the next one.
pub(crate) async fn run_session<T>(transport: &T, ctx: SessionContext<'_>) -> SessionError
where
    T: GeyserTransport + ?Sized,
{
    let SessionContext {
        session_id,
        outbound_rx,
        inbound_tx,
        state_tx,
    } = ctx;

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let mut updates = match transport.subscribe(request_source(request_rx)).await {
        Ok(updates) => updates,
        Err(err) => return SessionError::Connect(err),
    };

    state_tx.send_replace(ConnectionState::Active {
        session: session_id,
    });
    debug!(event = "stream_session_active", session_id);

    loop {
        tokio::select! {
            maybe_request = outbound_rx.recv() => {
                // The client keeps a sender alive, so the queue never closes
                // while a session is running.
                let Some(request) = maybe_request else {
                    return SessionError::RequestStreamClosed;
                };
                if request_tx.send(request).is_err() {
                    warn!(event = "subscription_request_lost", session_id);
                    return SessionError::RequestStreamClosed;
                }
                debug!(event = "subscription_request_sent", session_id);
            }
            maybe_update = updates.next() => {
                match maybe_update {
                    Some(Ok(update)) => {
                        trace!(event = "update_received", session_id, kind = update_kind(&update));
                        let _ = inbound_tx.send(update);
                    }
                    Some(Err(status)) => return SessionError::Status(status),
                    None => return SessionError::ServerClosed,
                }
            }
        }
    }
}

fn request_source(rx: mpsc::UnboundedReceiver<SubscribeRequest>) -> RequestStream {
    stream::unfold(rx, |mut rx| async move {
        let request = rx.recv().await?;
        Some((request, rx))
    })
    .boxed()
}
