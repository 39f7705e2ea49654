//! Unary Geyser calls.
//!
//! Each wrapper is one request/response round trip with no retry or caching.
//! The optional commitment is attached to the request before it is sent, and
//! transport errors are returned unchanged.

use tracing::debug;

use crate::stream::client::GeyserClient;
use crate::stream::proto::{
    commitment_tag, CommitmentLevel, GetBlockHeightRequest, GetBlockHeightResponse,
    GetLatestBlockhashRequest, GetLatestBlockhashResponse, GetSlotRequest, GetSlotResponse,
    GetVersionRequest, GetVersionResponse, IsBlockhashValidRequest, IsBlockhashValidResponse,
    PingRequest, PongResponse,
};
use crate::transport::{GeyserTransport, TransportError};

impl<T: GeyserTransport> GeyserClient<T> {
    pub async fn ping(&self, count: i32) -> Result<PongResponse, TransportError> {
        debug!(event = "unary_call", method = "ping", count);
        self.transport().ping(PingRequest { count }).await
    }

    pub async fn get_slot(
        &self,
        commitment: Option<CommitmentLevel>,
    ) -> Result<GetSlotResponse, TransportError> {
        debug!(event = "unary_call", method = "get_slot", ?commitment);
        let request = GetSlotRequest {
            commitment: commitment_tag(commitment),
        };
        self.transport().get_slot(request).await
    }

    pub async fn get_block_height(
        &self,
        commitment: Option<CommitmentLevel>,
    ) -> Result<GetBlockHeightResponse, TransportError> {
        debug!(event = "unary_call", method = "get_block_height", ?commitment);
        let request = GetBlockHeightRequest {
            commitment: commitment_tag(commitment),
        };
        self.transport().get_block_height(request).await
    }

    pub async fn get_latest_blockhash(
        &self,
        commitment: Option<CommitmentLevel>,
    ) -> Result<GetLatestBlockhashResponse, TransportError> {
        debug!(event = "unary_call", method = "get_latest_blockhash", ?commitment);
        let request = GetLatestBlockhashRequest {
            commitment: commitment_tag(commitment),
        };
        self.transport().get_latest_blockhash(request).await
    }

    /// Checks whether `blockhash` can still be used for a transaction.
    pub async fn is_blockhash_valid(
        &self,
        blockhash: impl Into<String>,
        commitment: Option<CommitmentLevel>,
    ) -> Result<IsBlockhashValidResponse, TransportError> {
        debug!(event = "unary_call", method = "is_blockhash_valid", ?commitment);
        let request = IsBlockhashValidRequest {
            blockhash: blockhash.into(),
            commitment: commitment_tag(commitment),
        };
        self.transport().is_blockhash_valid(request).await
    }

    /// Returns the version string reported by the Geyser plugin.
    pub async fn get_version(&self) -> Result<GetVersionResponse, TransportError> {
        debug!(event = "unary_call", method = "get_version");
        self.transport().get_version(GetVersionRequest::default()).await
    }
}
