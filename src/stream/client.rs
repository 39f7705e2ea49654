//! Geyser subscription client and reconnecting stream driver.
//!
//! The client owns an outbound request queue and an inbound update queue.
//! [`GeyserClient::subscribe`] spawns a background driver that repeatedly
//! opens a subscribe call, drains the outbound queue into it and forwards its
//! updates to the inbound queue. When a call fails the driver opens a new one,
//! so callers see one continuous conversation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::GeyserClientOptions;
use crate::stream::proto::{accounts_subscription, SubscribeRequest, SubscribeUpdate};
use crate::stream::queue::{SharedUpdateReceiver, SubscriptionSender, UpdateStream};
use crate::stream::session::{run_session, SessionContext, SessionError};
use crate::transport::{connect_transport, GeyserTransport, GrpcTransport, TransportError};

/// Driver state machine, observable through [`GeyserClient::state`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// No driver is running. Also the final state after [`GeyserClient::close`].
    Idle,
    /// A subscribe call is being opened. `attempt` counts consecutive
    /// attempts since the last active session.
    Connecting { attempt: usize },
    /// Session number `session` is open and forwarding.
    Active { session: u64 },
    /// Session number `session` ended; a reconnect follows.
    Failed { session: u64 },
}

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum GeyserClientError {
    /// Outbound request queue has been closed.
    #[error("send queue is closed")]
    SendQueueClosed,

    /// Transport setup or unary call failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Shared<T> {
    transport: T,
    options: GeyserClientOptions,
    outbound_tx: mpsc::UnboundedSender<SubscribeRequest>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<SubscribeRequest>>,
    inbound_tx: mpsc::UnboundedSender<SubscribeUpdate>,
    inbound_rx: SharedUpdateReceiver,
    state_tx: watch::Sender<ConnectionState>,
    closed: AtomicBool,
}

/// Multiplexing client for the Geyser subscribe stream and unary calls.
pub struct GeyserClient<T> {
    shared: Arc<Shared<T>>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

/// Connects a gRPC transport to `endpoint` and wraps it in a client.
///
/// The stream driver is not started until [`GeyserClient::subscribe`].
pub async fn connect(
    endpoint: impl Into<String>,
    x_token: Option<SecretString>,
    options: GeyserClientOptions,
) -> Result<GeyserClient<GrpcTransport>, GeyserClientError> {
    let transport = connect_transport(endpoint, x_token, &options).await?;
    Ok(GeyserClient::new(transport, options))
}

impl<T: GeyserTransport> GeyserClient<T> {
    /// Creates a client with empty queues and no running driver.
    pub fn new(transport: T, options: GeyserClientOptions) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            shared: Arc::new(Shared {
                transport,
                options,
                outbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
                inbound_tx,
                inbound_rx: Arc::new(Mutex::new(inbound_rx)),
                state_tx,
                closed: AtomicBool::new(false),
            }),
            driver: StdMutex::new(None),
        }
    }

    /// Options this client was built with.
    pub fn options(&self) -> &GeyserClientOptions {
        &self.shared.options
    }

    pub(crate) fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Returns a cloneable handle to the outbound request queue.
    pub fn sender(&self) -> SubscriptionSender {
        SubscriptionSender::new(self.shared.outbound_tx.clone())
    }

    /// Returns the continuous inbound update sequence.
    pub fn responses(&self) -> UpdateStream {
        UpdateStream::new(Arc::clone(&self.shared.inbound_rx))
    }

    /// Watches the driver state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Queues a watch-list replacement for the configured subscription group.
    ///
    /// Never blocks and may be called before [`subscribe`](Self::subscribe).
    pub fn update_subscription<I, S>(&self, accounts: I) -> Result<(), GeyserClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = &self.shared.options;
        let request =
            accounts_subscription(&options.subscription_group, accounts, options.commitment);
        self.sender().send(request)
    }

    /// Starts the stream driver and returns the queue handles.
    ///
    /// Calling this while the driver is already running returns new handles
    /// to the same queues. After [`close`](Self::close) no driver is started;
    /// the handles still reach the surviving queues. Must be called from
    /// within a tokio runtime.
    pub fn subscribe(&self) -> (SubscriptionSender, UpdateStream) {
        let mut driver = lock(&self.driver);
        let running = driver.as_ref().is_some_and(|handle| !handle.is_finished());
        if self.is_closed() {
            warn!(event = "stream_subscribe_after_close");
        } else if !running {
            let shared = Arc::clone(&self.shared);
            *driver = Some(tokio::spawn(stream_driver(shared)));
        }
        drop(driver);

        (self.sender(), self.responses())
    }

    /// Drains requests still waiting in the outbound queue.
    ///
    /// Returns nothing while the driver is running, since the driver owns the
    /// queue's consuming end.
    pub fn pending_requests(&self) -> Vec<SubscribeRequest> {
        let Ok(mut outbound_rx) = self.shared.outbound_rx.try_lock() else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        while let Ok(request) = outbound_rx.try_recv() {
            pending.push(request);
        }
        pending
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stops the driver, tears down the live session and releases the
    /// transport. Both queues keep their contents. The client cannot be
    /// subscribed again afterwards.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let handle = lock(&self.driver).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.state_tx.send_replace(ConnectionState::Idle);
        self.shared.transport.close().await;
    }
}

impl<T> Drop for GeyserClient<T> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.driver).take() {
            handle.abort();
        }
    }
}

fn lock<V>(mutex: &StdMutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn stream_driver<T: GeyserTransport>(shared: Arc<Shared<T>>) {
    let mut outbound_rx = shared.outbound_rx.lock().await;
    let mut session_id: u64 = 0;
    let mut failures: usize = 0;

    loop {
        session_id += 1;
        shared.state_tx.send_replace(ConnectionState::Connecting {
            attempt: failures + 1,
        });

        let err = run_session(
            &shared.transport,
            SessionContext {
                session_id,
                outbound_rx: &mut *outbound_rx,
                inbound_tx: &shared.inbound_tx,
                state_tx: &shared.state_tx,
            },
        )
        .await;

        if matches!(err, SessionError::Connect(TransportError::Closed)) {
            warn!(event = "stream_driver_stopped", session_id, error = %err);
            shared.state_tx.send_replace(ConnectionState::Idle);
            return;
        }

        failures = if err.was_active() { 0 } else { failures + 1 };
        shared
            .state_tx
            .send_replace(ConnectionState::Failed { session: session_id });
        warn!(event = "stream_session_failed", session_id, error = %err);

        let delay = shared.options.reconnect.delay_for_attempt(failures + 1);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            debug!(
                event = "stream_reconnect_scheduled",
                session_id,
                failures,
                delay_ms = delay.as_millis() as u64
            );
            tokio::time::sleep(delay).await;
        }
    }
}
