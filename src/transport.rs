//! Transport boundary between the stream multiplexer and the Geyser service.
//!
//! [`GeyserTransport`] is the seam the client is generic over. The production
//! implementation, [`GrpcTransport`], wraps `yellowstone-grpc-client`; tests
//! plug in an in-process fake.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;
use yellowstone_grpc_client::{
    ClientTlsConfig, GeyserGrpcBuilder, GeyserGrpcBuilderError, GeyserGrpcClient,
    InterceptorXToken,
};
use yellowstone_grpc_proto::prelude::geyser_client::GeyserClient as GeyserRpcClient;
use yellowstone_grpc_proto::tonic::service::interceptor::InterceptedService;
use yellowstone_grpc_proto::tonic::transport::Channel;

use crate::config::GeyserClientOptions;
use crate::stream::proto::{
    GetBlockHeightRequest, GetBlockHeightResponse, GetLatestBlockhashRequest,
    GetLatestBlockhashResponse, GetSlotRequest, GetSlotResponse, GetVersionRequest,
    GetVersionResponse, IsBlockhashValidRequest, IsBlockhashValidResponse, PingRequest,
    PongResponse, Status, SubscribeRequest, SubscribeUpdate,
};

/// Request side of one subscribe call.
pub type RequestStream = BoxStream<'static, SubscribeRequest>;

/// Response side of one subscribe call.
pub type UpdateResultStream = BoxStream<'static, Result<SubscribeUpdate, Status>>;

/// Errors produced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The service answered with a non-OK gRPC status.
    #[error("grpc status: {0}")]
    Status(#[from] Status),

    /// Endpoint, token or channel setup failed.
    #[error("grpc client setup error: {0}")]
    Builder(#[from] GeyserGrpcBuilderError),

    /// The transport was closed by [`GeyserTransport::close`].
    #[error("transport is closed")]
    Closed,
}

/// Remote calls the client depends on.
///
/// Unary calls receive fully-formed request messages; any commitment level is
/// already attached by the caller-facing wrapper.
#[async_trait]
pub trait GeyserTransport: Send + Sync + 'static {
    /// Opens a bidirectional subscribe call fed by `requests`.
    async fn subscribe(&self, requests: RequestStream)
        -> Result<UpdateResultStream, TransportError>;

    async fn ping(&self, request: PingRequest) -> Result<PongResponse, TransportError>;

    async fn get_slot(&self, request: GetSlotRequest) -> Result<GetSlotResponse, TransportError>;

    async fn get_block_height(
        &self,
        request: GetBlockHeightRequest,
    ) -> Result<GetBlockHeightResponse, TransportError>;

    async fn get_latest_blockhash(
        &self,
        request: GetLatestBlockhashRequest,
    ) -> Result<GetLatestBlockhashResponse, TransportError>;

    async fn is_blockhash_valid(
        &self,
        request: IsBlockhashValidRequest,
    ) -> Result<IsBlockhashValidResponse, TransportError>;

    async fn get_version(
        &self,
        request: GetVersionRequest,
    ) -> Result<GetVersionResponse, TransportError>;

    /// Releases the underlying channel. Later calls fail with
    /// [`TransportError::Closed`].
    async fn close(&self) {}
}

type GeyserRpc = GeyserRpcClient<InterceptedService<Channel, InterceptorXToken>>;

/// gRPC transport backed by a tonic channel.
///
/// Every call works on its own clone of the tonic client, so unary calls and
/// the subscribe call never wait on each other.
pub struct GrpcTransport {
    endpoint: String,
    rpc: Mutex<Option<GeyserRpc>>,
}

impl GrpcTransport {
    fn new(
        endpoint: String,
        channel: Channel,
        builder: GeyserGrpcBuilder,
        options: &GeyserClientOptions,
    ) -> Self {
        let interceptor = InterceptorXToken {
            x_token: builder.x_token,
            x_request_snapshot: false,
        };
        let rpc = GeyserRpcClient::with_interceptor(channel, interceptor)
            .max_decoding_message_size(options.max_decoding_message_size);

        Self {
            endpoint,
            rpc: Mutex::new(Some(rpc)),
        }
    }

    /// Endpoint this transport was connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rpc(&self) -> Result<GeyserRpc, TransportError> {
        lock(&self.rpc).clone().ok_or(TransportError::Closed)
    }
}

impl std::fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn grpc_builder(
    endpoint: &str,
    x_token: Option<SecretString>,
    options: &GeyserClientOptions,
) -> Result<GeyserGrpcBuilder, TransportError> {
    let x_token = x_token
        .map(|token| token.expose_secret().trim().to_string())
        .filter(|token| !token.is_empty());

    let mut builder = GeyserGrpcClient::build_from_shared(endpoint.to_string())?
        .x_token(x_token)?
        .connect_timeout(options.connect_timeout);
    if endpoint.starts_with("https://") {
        builder = builder.tls_config(ClientTlsConfig::new().with_native_roots())?;
    }
    Ok(builder)
}

/// Connects a gRPC channel to `endpoint`.
///
/// An empty or absent `x_token` sends no `x-token` metadata. TLS with native
/// roots is enabled for `https://` endpoints. No per-request timeout is set
/// because it would also bound the lifetime of the subscribe stream.
pub async fn connect_transport(
    endpoint: impl Into<String>,
    x_token: Option<SecretString>,
    options: &GeyserClientOptions,
) -> Result<GrpcTransport, TransportError> {
    let endpoint = endpoint.into().trim().to_string();
    let builder = grpc_builder(&endpoint, x_token, options)?;
    let channel = builder
        .endpoint
        .connect()
        .await
        .map_err(GeyserGrpcBuilderError::from)?;
    debug!(event = "grpc_channel_connected", endpoint = %endpoint);

    Ok(GrpcTransport::new(endpoint, channel, builder, options))
}

/// Concrete stream type handed to tonic; passing the boxed trait object
/// directly trips a rustc higher-ranked lifetime error in the `Send` check.
struct RequestStreamAdapter(RequestStream);

impl Stream for RequestStreamAdapter {
    type Item = SubscribeRequest;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }
}

#[async_trait]
impl GeyserTransport for GrpcTransport {
    async fn subscribe(
        &self,
        requests: RequestStream,
    ) -> Result<UpdateResultStream, TransportError> {
        let updates = self
            .rpc()?
            .subscribe(RequestStreamAdapter(requests))
            .await?
            .into_inner();
        Ok(updates.boxed())
    }

    async fn ping(&self, request: PingRequest) -> Result<PongResponse, TransportError> {
        Ok(self.rpc()?.ping(request).await?.into_inner())
    }

    async fn get_slot(&self, request: GetSlotRequest) -> Result<GetSlotResponse, TransportError> {
        Ok(self.rpc()?.get_slot(request).await?.into_inner())
    }

    async fn get_block_height(
        &self,
        request: GetBlockHeightRequest,
    ) -> Result<GetBlockHeightResponse, TransportError> {
        Ok(self.rpc()?.get_block_height(request).await?.into_inner())
    }

    async fn get_latest_blockhash(
        &self,
        request: GetLatestBlockhashRequest,
    ) -> Result<GetLatestBlockhashResponse, TransportError> {
        Ok(self.rpc()?.get_latest_blockhash(request).await?.into_inner())
    }

    async fn is_blockhash_valid(
        &self,
        request: IsBlockhashValidRequest,
    ) -> Result<IsBlockhashValidResponse, TransportError> {
        Ok(self.rpc()?.is_blockhash_valid(request).await?.into_inner())
    }

    async fn get_version(
        &self,
        request: GetVersionRequest,
    ) -> Result<GetVersionResponse, TransportError> {
        Ok(self.rpc()?.get_version(request).await?.into_inner())
    }

    /// Drops the shared client. Calls already in flight keep their own clone
    /// and finish on their own.
    async fn close(&self) {
        if lock(&self.rpc).take().is_some() {
            debug!(event = "grpc_channel_released", endpoint = %self.endpoint);
        }
    }
}
