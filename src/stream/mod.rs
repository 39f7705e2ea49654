//! Subscribe-stream modules.
//!
//! - `client`: caller-facing client and the reconnecting stream driver.
//! - `proto`: Geyser messages and request builders.
//! - `queue`: outbound request queue and inbound update sequence.
//! - `session`: one live subscribe call.

/// Client handle and stream driver.
pub mod client;
/// Geyser protocol messages.
pub mod proto;
/// Outbound and inbound queues.
pub mod queue;
pub(crate) mod session;
