//! C2 Connection Manager (spec §4.2): handshake, per-connection full-duplex
//! I/O, heartbeat, close and reconnect-replaces-attachment semantics.
//!
//! Transport-agnostic: driven by any `axum::extract::ws::WebSocket`-shaped
//! split sink/stream, grounded in the hashintel-hash `harpc` session layer's
//! pattern of one reader + one writer task per connection talking through a
//! bounded channel, generalized from that file's `Semaphore`/`CancellationToken`
//! shape rather than copied verbatim.

pub mod handle;
pub mod manager;

pub use handle::{ConnectionHandle, OutboundFrame};
pub use manager::{is_compatible_subprotocol, ConnectionManager, ConnectionManagerConfig};
