use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use geyser_stream_sdk::stream::proto::{
    CommitmentLevel, GetBlockHeightRequest, GetBlockHeightResponse, GetLatestBlockhashRequest,
    GetLatestBlockhashResponse, GetSlotRequest, GetSlotResponse, GetVersionRequest,
    GetVersionResponse, IsBlockhashValidRequest, IsBlockhashValidResponse, PingRequest,
    PongResponse, Status, SubscribeRequest, SubscribeUpdate,
};
use geyser_stream_sdk::transport::{RequestStream, UpdateResultStream};
use geyser_stream_sdk::{
    ConnectionState, GeyserClient, GeyserClientOptions, GeyserTransport, TransportError,
    UpdateStream,
};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use yellowstone_grpc_proto::tonic::Code;

const WAIT: Duration = Duration::from_secs(2);
const TEST_SLOT: u64 = 281_474_976;

/// Server side of one subscribe call opened by the driver.
struct FakeSession {
    requests: RequestStream,
    updates: mpsc::UnboundedSender<Result<SubscribeUpdate, Status>>,
}

impl FakeSession {
    async fn next_request(&mut self) -> Option<SubscribeRequest> {
        timeout(WAIT, self.requests.next())
            .await
            .expect("timed out waiting for subscribe request")
    }

    fn push(&self, update: SubscribeUpdate) {
        self.updates.send(Ok(update)).expect("session still open");
    }

    fn fail(&self, status: Status) {
        let _ = self.updates.send(Err(status));
    }
}

#[derive(Default)]
struct FakeState {
    refuse_connects: AtomicUsize,
    hold_next_connect: AtomicBool,
    release_connect: Notify,
    subscribe_calls: AtomicUsize,
    live_sessions: AtomicUsize,
    max_live_sessions: AtomicUsize,
    delivered_updates: AtomicUsize,
    closed: AtomicBool,
    unary_requests: Mutex<Vec<String>>,
    slot_requests: Mutex<Vec<GetSlotRequest>>,
}

struct FakeTransport {
    state: Arc<FakeState>,
    sessions: mpsc::UnboundedSender<FakeSession>,
}

struct TrackedUpdates {
    rx: mpsc::UnboundedReceiver<Result<SubscribeUpdate, Status>>,
    state: Arc<FakeState>,
}

impl Stream for TrackedUpdates {
    type Item = Result<SubscribeUpdate, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(Ok(_))) = &polled {
            self.state.delivered_updates.fetch_add(1, Ordering::SeqCst);
        }
        polled
    }
}

impl Drop for TrackedUpdates {
    fn drop(&mut self) {
        self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransport {
    fn record(&self, method: &str) {
        self.state
            .unary_requests
            .lock()
            .expect("unary log")
            .push(method.to_string());
    }
}

#[async_trait]
impl GeyserTransport for FakeTransport {
    async fn subscribe(
        &self,
        requests: RequestStream,
    ) -> Result<UpdateResultStream, TransportError> {
        self.state.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.hold_next_connect.swap(false, Ordering::SeqCst) {
            self.state.release_connect.notified().await;
        }
        let refused = self
            .state
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Status(Status::unavailable("connect refused")));
        }

        let live = self.state.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live_sessions.fetch_max(live, Ordering::SeqCst);

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let _ = self.sessions.send(FakeSession {
            requests,
            updates: updates_tx,
        });
        Ok(TrackedUpdates {
            rx: updates_rx,
            state: Arc::clone(&self.state),
        }
        .boxed())
    }

    async fn ping(&self, request: PingRequest) -> Result<PongResponse, TransportError> {
        self.record("ping");
        Ok(PongResponse {
            count: request.count,
        })
    }

    async fn get_slot(&self, request: GetSlotRequest) -> Result<GetSlotResponse, TransportError> {
        self.record("get_slot");
        self.state
            .slot_requests
            .lock()
            .expect("slot log")
            .push(request);
        Ok(GetSlotResponse { slot: TEST_SLOT })
    }

    async fn get_block_height(
        &self,
        request: GetBlockHeightRequest,
    ) -> Result<GetBlockHeightResponse, TransportError> {
        self.record("get_block_height");
        Ok(GetBlockHeightResponse {
            block_height: request.commitment.map_or(0, |tag| 1_000 + tag as u64),
        })
    }

    async fn get_latest_blockhash(
        &self,
        request: GetLatestBlockhashRequest,
    ) -> Result<GetLatestBlockhashResponse, TransportError> {
        self.record("get_latest_blockhash");
        Ok(GetLatestBlockhashResponse {
            slot: TEST_SLOT,
            blockhash: format!("hash-{:?}", request.commitment),
            last_valid_block_height: 150,
        })
    }

    async fn is_blockhash_valid(
        &self,
        request: IsBlockhashValidRequest,
    ) -> Result<IsBlockhashValidResponse, TransportError> {
        self.record("is_blockhash_valid");
        Ok(IsBlockhashValidResponse {
            slot: TEST_SLOT,
            valid: request.blockhash == "known-hash"
                && request.commitment == Some(CommitmentLevel::Finalized as i32),
        })
    }

    async fn get_version(
        &self,
        _request: GetVersionRequest,
    ) -> Result<GetVersionResponse, TransportError> {
        self.record("get_version");
        Err(TransportError::Status(Status::unavailable("plugin restarting")))
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct Harness {
    client: GeyserClient<FakeTransport>,
    state: Arc<FakeState>,
    sessions: mpsc::UnboundedReceiver<FakeSession>,
}

impl Harness {
    fn new() -> Self {
        let state = Arc::new(FakeState::default());
        let (sessions_tx, sessions) = mpsc::unbounded_channel();
        let transport = FakeTransport {
            state: Arc::clone(&state),
            sessions: sessions_tx,
        };
        Self {
            client: GeyserClient::new(transport, GeyserClientOptions::default()),
            state,
            sessions,
        }
    }

    async fn next_session(&mut self) -> FakeSession {
        timeout(WAIT, self.sessions.recv())
            .await
            .expect("timed out waiting for a new session")
            .expect("transport dropped")
    }
}

fn tagged(tag: &str) -> SubscribeUpdate {
    SubscribeUpdate {
        filters: vec![tag.to_string()],
        ..Default::default()
    }
}

fn watched_accounts(request: &SubscribeRequest) -> Vec<String> {
    request
        .accounts
        .get("raydium")
        .map(|filter| filter.account.clone())
        .unwrap_or_default()
}

async fn next_update(updates: &mut UpdateStream) -> SubscribeUpdate {
    timeout(WAIT, updates.next())
        .await
        .expect("timed out waiting for update")
        .expect("update stream never ends")
}

async fn wait_for_state(
    state: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) {
    timeout(WAIT, state.wait_for(predicate))
        .await
        .expect("timed out waiting for driver state")
        .expect("driver state channel open");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_queued_before_subscribe_is_sent_first_and_echo_is_delivered() {
    let mut harness = Harness::new();
    harness
        .client
        .update_subscription(["addrA", "addrB"])
        .expect("queue open");

    let (_sender, mut updates) = harness.client.subscribe();
    let mut session = harness.next_session().await;

    let first = session.next_request().await.expect("first request");
    assert_eq!(watched_accounts(&first), vec!["addrA", "addrB"]);
    assert_eq!(first.commitment, Some(CommitmentLevel::Processed as i32));

    session.push(tagged("confirmation"));
    assert_eq!(next_update(&mut updates).await.filters, vec!["confirmation"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outbound_requests_are_transmitted_in_enqueue_order() {
    let mut harness = Harness::new();
    for index in 0..10 {
        harness
            .client
            .update_subscription([format!("early-{index}")])
            .expect("queue open");
    }

    let (sender, _updates) = harness.client.subscribe();
    let mut session = harness.next_session().await;

    for index in 0..10 {
        sender
            .send(geyser_stream_sdk::stream::proto::accounts_subscription(
                "raydium",
                [format!("late-{index}")],
                CommitmentLevel::Processed,
            ))
            .expect("queue open");
    }

    let mut seen = Vec::new();
    for _ in 0..20 {
        let request = session.next_request().await.expect("request");
        seen.extend(watched_accounts(&request));
    }
    let expected: Vec<String> = (0..10)
        .map(|index| format!("early-{index}"))
        .chain((0..10).map(|index| format!("late-{index}")))
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_updates_keep_delivery_order() {
    let mut harness = Harness::new();
    let (_sender, mut updates) = harness.client.subscribe();
    let session = harness.next_session().await;

    for index in 0..50 {
        session.push(tagged(&format!("update-{index}")));
    }
    for index in 0..50 {
        assert_eq!(
            next_update(&mut updates).await.filters,
            vec![format!("update-{index}")]
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_enqueued_during_reconnect_gap_is_sent_on_next_session() {
    let mut harness = Harness::new();
    let mut state = harness.client.state();
    let (sender, mut updates) = harness.client.subscribe();

    let mut first = harness.next_session().await;
    wait_for_state(&mut state, |s| *s == ConnectionState::Active { session: 1 }).await;
    first.push(tagged("before-drop"));
    assert_eq!(next_update(&mut updates).await.filters, vec!["before-drop"]);

    harness.state.hold_next_connect.store(true, Ordering::SeqCst);
    first.fail(Status::unavailable("connection reset"));
    wait_for_state(&mut state, |s| matches!(s, ConnectionState::Connecting { .. })).await;

    harness
        .client
        .update_subscription(["gap-1"])
        .expect("queue open");
    sender
        .send(geyser_stream_sdk::stream::proto::ping_request(9))
        .expect("queue open");

    assert!(
        first.next_request().await.is_none(),
        "failed session must be torn down before the next one"
    );

    harness.state.release_connect.notify_one();
    let mut second = harness.next_session().await;
    let replayed = second.next_request().await.expect("gap request");
    assert_eq!(watched_accounts(&replayed), vec!["gap-1"]);
    let ping = second.next_request().await.expect("gap ping");
    assert_eq!(ping.ping.map(|ping| ping.id), Some(9));

    second.push(tagged("after-reconnect"));
    assert_eq!(next_update(&mut updates).await.filters, vec!["after-reconnect"]);
    assert_eq!(harness.state.subscribe_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_reconnects_through_refused_attempts() {
    let mut harness = Harness::new();
    harness.state.refuse_connects.store(5, Ordering::SeqCst);
    harness
        .client
        .update_subscription(["persistent"])
        .expect("queue open");

    let mut state = harness.client.state();
    let _ = harness.client.subscribe();

    let mut session = harness.next_session().await;
    wait_for_state(&mut state, |s| *s == ConnectionState::Active { session: 6 }).await;
    assert_eq!(harness.state.subscribe_calls.load(Ordering::SeqCst), 6);

    let request = session.next_request().await.expect("queued request");
    assert_eq!(watched_accounts(&request), vec!["persistent"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_close_and_errors_never_overlap_sessions() {
    let mut harness = Harness::new();
    let (_sender, mut updates) = harness.client.subscribe();

    for round in 0..5 {
        let session = harness.next_session().await;
        session.push(tagged(&format!("round-{round}")));
        assert_eq!(
            next_update(&mut updates).await.filters,
            vec![format!("round-{round}")]
        );
        if round % 2 == 0 {
            session.fail(Status::internal("protocol violation"));
        } else {
            drop(session);
        }
    }

    let _last = harness.next_session().await;
    assert_eq!(harness.state.max_live_sessions.load(Ordering::SeqCst), 1);
    assert_eq!(harness.state.subscribe_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_stops_driver_and_keeps_queues_intact() {
    let mut harness = Harness::new();
    let (sender, mut updates) = harness.client.subscribe();
    let session = harness.next_session().await;
    session.push(tagged("buffered-1"));
    session.push(tagged("buffered-2"));
    timeout(WAIT, async {
        while harness.state.delivered_updates.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session forwarded both updates");

    harness.client.close().await;

    assert_eq!(*harness.client.state().borrow(), ConnectionState::Idle);
    assert_eq!(harness.state.live_sessions.load(Ordering::SeqCst), 0);
    assert!(harness.state.closed.load(Ordering::SeqCst));
    assert!(session.updates.is_closed(), "live call must be released");

    sender
        .send(geyser_stream_sdk::stream::proto::ping_request(1))
        .expect("queue survives close");
    harness
        .client
        .update_subscription(["after-close"])
        .expect("queue survives close");
    let pending = harness.client.pending_requests();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].ping.as_ref().map(|ping| ping.id), Some(1));
    assert_eq!(watched_accounts(&pending[1]), vec!["after-close"]);

    assert_eq!(next_update(&mut updates).await.filters, vec!["buffered-1"]);
    assert_eq!(next_update(&mut updates).await.filters, vec!["buffered-2"]);
    let idle = timeout(Duration::from_millis(50), updates.next()).await;
    assert!(idle.is_err(), "update sequence stays open after close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribe_after_close_does_not_reconnect() {
    let mut harness = Harness::new();
    let _ = harness.client.subscribe();
    let _session = harness.next_session().await;
    harness.client.close().await;

    let (sender, _updates) = harness.client.subscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.state.subscribe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*harness.client.state().borrow(), ConnectionState::Idle);
    sender
        .send(geyser_stream_sdk::stream::proto::ping_request(2))
        .expect("queue survives close");
    assert_eq!(harness.client.pending_requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_slot_attaches_commitment_and_returns_response() {
    let harness = Harness::new();

    let response = harness
        .client
        .get_slot(Some(CommitmentLevel::Confirmed))
        .await
        .expect("get_slot");
    assert_eq!(response.slot, TEST_SLOT);

    let _ = harness.client.get_slot(None).await.expect("get_slot");
    let requests = harness.state.slot_requests.lock().expect("slot log").clone();
    assert_eq!(
        requests
            .iter()
            .map(|request| request.commitment)
            .collect::<Vec<_>>(),
        vec![Some(CommitmentLevel::Confirmed as i32), None]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unary_wrappers_forward_parameters() {
    let harness = Harness::new();
    let client = &harness.client;

    assert_eq!(client.ping(3).await.expect("ping").count, 3);
    assert_eq!(
        client
            .get_block_height(Some(CommitmentLevel::Finalized))
            .await
            .expect("block height")
            .block_height,
        1_002
    );
    assert_eq!(
        client
            .get_latest_blockhash(None)
            .await
            .expect("blockhash")
            .blockhash,
        "hash-None"
    );
    assert!(
        client
            .is_blockhash_valid("known-hash", Some(CommitmentLevel::Finalized))
            .await
            .expect("is_blockhash_valid")
            .valid
    );
    assert!(
        !client
            .is_blockhash_valid("known-hash", None)
            .await
            .expect("is_blockhash_valid")
            .valid
    );

    let calls = harness.state.unary_requests.lock().expect("unary log").clone();
    assert_eq!(
        calls,
        vec![
            "ping",
            "get_block_height",
            "get_latest_blockhash",
            "is_blockhash_valid",
            "is_blockhash_valid"
        ]
    );
    assert_eq!(harness.state.subscribe_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unary_errors_propagate_unchanged() {
    let harness = Harness::new();
    let err = harness
        .client
        .get_version()
        .await
        .expect_err("version call fails");
    match err {
        TransportError::Status(status) => {
            assert_eq!(status.code(), Code::Unavailable);
            assert_eq!(status.message(), "plugin restarting");
        }
        other => panic!("unexpected error: {other}"),
    }
}
