//! Client options and their defaults.

use std::time::Duration;

use crate::retry::ReconnectPolicy;
use crate::stream::proto::CommitmentLevel;

/// Default values used by [`GeyserClientOptions::default`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GeyserDefaults;

impl GeyserDefaults {
    /// Timeout for establishing the gRPC channel.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Largest inbound message accepted, 64 MiB.
    pub const MAX_DECODING_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
    /// Filter name for account subscriptions.
    pub const SUBSCRIPTION_GROUP: &'static str = "raydium";
    /// Commitment attached to account subscriptions.
    pub const COMMITMENT: CommitmentLevel = CommitmentLevel::Processed;
}

/// Options shared by the transport and the stream driver.
#[derive(Clone, Debug)]
pub struct GeyserClientOptions {
    /// Timeout for establishing the gRPC channel.
    pub connect_timeout: Duration,
    /// Largest inbound message the channel will decode.
    pub max_decoding_message_size: usize,
    /// Filter name used by [`update_subscription`](crate::stream::client::GeyserClient::update_subscription).
    pub subscription_group: String,
    /// Commitment attached to account subscription requests.
    pub commitment: CommitmentLevel,
    /// Pacing between stream reconnect attempts.
    pub reconnect: ReconnectPolicy,
}

impl GeyserClientOptions {
    /// Sets the filter name used for account subscriptions.
    pub fn with_subscription_group(mut self, group: impl Into<String>) -> Self {
        self.subscription_group = group.into();
        self
    }

    /// Sets the commitment attached to account subscriptions.
    pub fn with_commitment(mut self, commitment: CommitmentLevel) -> Self {
        self.commitment = commitment;
        self
    }

    /// Sets the pacing between stream reconnect attempts.
    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the channel connect timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for GeyserClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: GeyserDefaults::CONNECT_TIMEOUT,
            max_decoding_message_size: GeyserDefaults::MAX_DECODING_MESSAGE_SIZE,
            subscription_group: GeyserDefaults::SUBSCRIPTION_GROUP.to_string(),
            commitment: GeyserDefaults::COMMITMENT,
            reconnect: ReconnectPolicy::immediate(),
        }
    }
}
