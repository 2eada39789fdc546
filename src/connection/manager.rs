//! Connection Manager: reader/writer task pair per connection, heartbeat
//! liveness, and reconnect-replaces-attachment (spec §4.2).
//!
//! Transport-agnostic over anything that can be split into a byte sink and
//! a byte stream of WebSocket binary frames; `src/transport/axum_ws.rs`
//! adapts an actual `axum` upgrade to this shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{ConnectionHandle, OutboundFrame};
use crate::error::CoreError;
use crate::protocol::codec::{self, CodecConfig};
use crate::protocol::frame::{Frame, FrameFlags, FrameType, Method};

#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    pub outbound_queue_capacity: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub drain_timeout: Duration,
    pub send_suspend_timeout: Duration,
    pub codec: CodecConfig,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
            send_suspend_timeout: Duration::from_secs(5),
            codec: CodecConfig::default(),
        }
    }
}

/// Inbound decoded frames the manager hands to whatever dispatches them
/// (the Session Router); kept generic here so this module has no
/// dependency on router internals.
pub type InboundSender = mpsc::Sender<(u64, Frame)>;

pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    next_connection_id: AtomicU64,
    connections: RwLock<HashMap<u64, ConnectionHandle>>,
    /// `(tenant_id, agent_id) -> connection_id`, for reconnect-replaces
    /// lookups (spec §4.2 "Reconnect").
    agent_index: RwLock<HashMap<(String, String), u64>>,
    inbound: InboundSender,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig, inbound: InboundSender) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_connection_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            agent_index: RwLock::new(HashMap::new()),
            inbound,
        })
    }

    pub fn get(&self, connection_id: u64) -> Option<ConnectionHandle> {
        self.connections.read().get(&connection_id).cloned()
    }

    pub fn resolve_agent_connection(&self, tenant_id: &str, agent_id: &str) -> Option<u64> {
        self.agent_index
            .read()
            .get(&(tenant_id.to_string(), agent_id.to_string()))
            .copied()
    }

    /// Accepts a handshaken transport (subprotocol/credential checks already
    /// done by the caller — spec §4.2 handshake contract) and spawns its
    /// reader/writer tasks. If `(tenant_id, agent_id)` already has a live
    /// connection, that prior attachment is atomically replaced: its queue
    /// is closed but in-flight task assignments are not cancelled, they're
    /// inherited by the new connection once the caller re-registers agent
    /// state against the new `connection_id`.
    pub fn accept<S>(
        self: &Arc<Self>,
        tenant_id: String,
        agent_id: Option<String>,
        transport: S,
        token: CancellationToken,
    ) -> ConnectionHandle
    where
        S: Stream<Item = Result<Vec<u8>, anyhow::Error>>
            + Sink<Vec<u8>, Error = anyhow::Error>
            + Send
            + 'static,
    {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::new(
            connection_id,
            tenant_id.clone(),
            agent_id.clone(),
            self.config.outbound_queue_capacity,
        );

        if let Some(agent_id) = &agent_id {
            let previous = self
                .agent_index
                .write()
                .insert((tenant_id.clone(), agent_id.clone()), connection_id);
            if let Some(previous_id) = previous {
                if let Some(previous_handle) = self.connections.write().remove(&previous_id) {
                    info!(tenant_id, agent_id, previous_id, connection_id, "reconnect replaced prior attachment");
                    previous_handle.close();
                }
            }
        }

        self.connections.write().insert(connection_id, handle.clone());

        let (mut sink, mut stream) = transport.split();
        let manager = Arc::clone(self);
        let queue = handle.queue();
        let codec_config = self.config.codec.clone();

        let writer_queue = queue.clone();
        let writer_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_token.cancelled() => break,
                    maybe_frame = writer_queue.recv() => {
                        let Some(OutboundFrame { frame, .. }) = maybe_frame else { break };
                        match codec::encode(&frame, &codec_config) {
                            Ok(bytes) => {
                                if sink.send(bytes).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!(%err, "failed to encode outbound frame"),
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        let reader_inbound = manager.inbound.clone();
        let reader_token = token.clone();
        let reader_manager = Arc::clone(&manager);
        let reader_codec_config = self.config.codec.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_token.cancelled() => break,
                    next = stream.next() => {
                        let Some(item) = next else { break };
                        match item {
                            Ok(bytes) => match codec::decode(&bytes, &reader_codec_config) {
                                Ok((frame, _consumed)) => {
                                    if reader_inbound.send((connection_id, frame)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    debug!(%err, connection_id, "dropping malformed frame");
                                }
                            },
                            Err(_) => break,
                        }
                    }
                }
            }
            reader_manager.mark_closed(connection_id, "io_error_or_eof");
        });

        let heartbeat_handle = handle.clone();
        let heartbeat_manager = Arc::clone(self);
        let heartbeat_token = token.clone();
        let ping_interval = self.config.ping_interval;
        let suspend_timeout = self.config.send_suspend_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => return,
                    _ = ticker.tick() => {
                        let ping = Frame::new(FrameType::Ping, 0, Method::Ping as u16, FrameFlags::empty(), Vec::new());
                        if !heartbeat_handle.send(ping, false, suspend_timeout).await {
                            heartbeat_manager.mark_closed(connection_id, "heartbeat_lost");
                            return;
                        }
                    }
                }
            }
        });

        handle
    }

    fn mark_closed(&self, connection_id: u64, reason: &str) {
        if let Some(existing) = self.connections.write().remove(&connection_id) {
            info!(connection_id, reason, "connection closed");
            existing.close();
            self.agent_index
                .write()
                .retain(|_, v| *v != connection_id);
        }
    }

    /// Graceful close (spec §4.2): sends `agent.shutdown` and gives the
    /// writer up to `drain_timeout` to flush before the connection is torn
    /// down by the reader/writer tasks observing the cancellation token.
    pub async fn close_gracefully(&self, connection_id: u64, reason: &str) {
        if let Some(handle) = self.get(connection_id) {
            let body = serde_json::to_vec(&serde_json::json!({ "reason": reason })).unwrap_or_default();
            let notice = Frame::new(FrameType::Notification, 0, Method::AgentShutdown as u16, FrameFlags::empty(), body);
            handle.send(notice, true, self.config.send_suspend_timeout).await;
            tokio::time::sleep(self.config.drain_timeout.min(Duration::from_millis(50))).await;
            handle.close();
        }
        self.mark_closed(connection_id, reason);
    }

    pub fn protocol_violation_threshold(&self) -> u32 {
        5
    }
}

pub fn is_compatible_subprotocol(offered: &[String]) -> Result<(), CoreError> {
    if offered.iter().any(|p| p == "mcp.v1") {
        Ok(())
    } else {
        Err(CoreError::ProtocolViolation("missing mcp.v1 subprotocol".into()))
    }
}
