//! Geyser protocol messages shared by the stream and unary surfaces.
//!
//! Update payloads are passed through untouched; the helpers here only build
//! outbound requests and label inbound updates for logging.

pub use yellowstone_grpc_proto::prelude::subscribe_update::UpdateOneof;
pub use yellowstone_grpc_proto::prelude::{
    CommitmentLevel, GetBlockHeightRequest, GetBlockHeightResponse, GetLatestBlockhashRequest,
    GetLatestBlockhashResponse, GetSlotRequest, GetSlotResponse, GetVersionRequest,
    GetVersionResponse, IsBlockhashValidRequest, IsBlockhashValidResponse, PingRequest,
    PongResponse, SubscribeRequest, SubscribeRequestFilterAccounts, SubscribeRequestPing,
    SubscribeUpdate,
};
pub use yellowstone_grpc_proto::tonic::Status;

/// Builds a request that replaces the account watch list of `group`.
pub fn accounts_subscription<I, S>(
    group: &str,
    accounts: I,
    commitment: CommitmentLevel,
) -> SubscribeRequest
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut request = SubscribeRequest {
        commitment: Some(commitment as i32),
        ..Default::default()
    };
    request.accounts.insert(
        group.to_string(),
        SubscribeRequestFilterAccounts {
            account: accounts.into_iter().map(Into::into).collect(),
            ..Default::default()
        },
    );
    request
}

/// Builds a keepalive request answering a server ping on the stream.
pub fn ping_request(id: i32) -> SubscribeRequest {
    SubscribeRequest {
        ping: Some(SubscribeRequestPing { id }),
        ..Default::default()
    }
}

/// Parses `processed`, `confirmed` or `finalized` (any case).
pub fn parse_commitment(value: &str) -> Option<CommitmentLevel> {
    CommitmentLevel::from_str_name(&value.trim().to_ascii_uppercase())
}

/// Short label for the payload carried by an update.
pub fn update_kind(update: &SubscribeUpdate) -> &'static str {
    match &update.update_oneof {
        Some(UpdateOneof::Account(_)) => "account",
        Some(UpdateOneof::Slot(_)) => "slot",
        Some(UpdateOneof::Transaction(_)) => "transaction",
        Some(UpdateOneof::Block(_)) => "block",
        Some(UpdateOneof::BlockMeta(_)) => "block_meta",
        Some(UpdateOneof::Ping(_)) => "ping",
        Some(UpdateOneof::Pong(_)) => "pong",
        Some(_) => "other",
        None => "empty",
    }
}

pub(crate) fn commitment_tag(commitment: Option<CommitmentLevel>) -> Option<i32> {
    commitment.map(|level| level as i32)
}
