//! Client SDK for the Solana Geyser gRPC service.
//!
//! The crate is organized by transport surface:
//! - `stream`: reconnecting subscribe-stream multiplexer and its queues.
//! - `unary`: ping, slot, block height and blockhash calls.
//! - `transport`: the gRPC boundary the client is generic over.
//! - `config`: client options and defaults.
//! - `retry`: reconnect pacing.

/// Client options and defaults.
pub mod config;
/// Reconnect pacing for the stream driver.
pub mod retry;
/// Subscribe-stream client, protocol helpers, queues and sessions.
pub mod stream;
/// Transport trait and gRPC implementation.
pub mod transport;
/// Unary call wrappers on the client.
mod unary;

pub use config::{GeyserClientOptions, GeyserDefaults};
pub use retry::ReconnectPolicy;
pub use stream::client::{connect, ConnectionState, GeyserClient, GeyserClientError};
pub use stream::queue::{SubscriptionSender, UpdateStream};
pub use transport::{GeyserTransport, GrpcTransport, TransportError};
