//! Reference agent client: connects over the wire protocol, registers,
//! heartbeats, and completes whatever tasks the server assigns it. Exists to
//! exercise the server end to end, not as a production worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agentmesh_core::protocol::codec::{self, CodecConfig};
use agentmesh_core::protocol::frame::{Frame, FrameFlags, FrameType, Method};
use agentmesh_core::protocol::methods::{
    AgentHeartbeatRequest, AgentRegisterRequest, AgentResources, HeartbeatMetrics,
    TaskAssignedNotification, TaskCompleteRequest,
};
use agentmesh_core::registry::Capability;
use clap::Parser;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "ws://127.0.0.1:7800/ws")]
    url: String,

    #[arg(long, default_value = "tenant-demo")]
    tenant_id: String,

    #[arg(long, default_value = "agent-sim-1")]
    agent_id: String,

    #[arg(long, default_value = "worker")]
    agent_type: String,
}

struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut url = Url::parse(&args.url)?;
    url.query_pairs_mut()
        .append_pair("tenant_id", &args.tenant_id)
        .append_pair("agent_id", &args.agent_id);

    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mcp.v1"));

    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
    info!(url = %args.url, agent_id = %args.agent_id, "connected to agentmesh server");
    let (mut sink, mut stream) = ws_stream.split();

    let codec_config = CodecConfig::default();
    let sequence = SequenceCounter(AtomicU64::new(1));

    let register = AgentRegisterRequest {
        agent_id: args.agent_id.clone(),
        agent_type: args.agent_type.clone(),
        capabilities: vec![Capability {
            name: "general".into(),
            confidence: 0.9,
            specialties: vec![],
            languages: vec![],
            model_id: None,
        }],
        resources: AgentResources { max_concurrent: 4 },
        metadata: serde_json::json!({}),
    };
    send_request(&mut sink, &codec_config, &sequence, Method::AgentRegister, &register).await?;

    let mut heartbeat_ticker = tokio::time::interval(Duration::from_secs(15));

    loop {
        tokio::select! {
            _ = heartbeat_ticker.tick() => {
                let heartbeat = AgentHeartbeatRequest {
                    status: "active".into(),
                    metrics: HeartbeatMetrics {
                        latency_ms: Some(50.0),
                        cost_usd: Some(0.0),
                        current_tasks: Some(0),
                    },
                };
                send_request(&mut sink, &codec_config, &sequence, Method::AgentHeartbeat, &heartbeat).await?;
            }
            next = stream.next() => {
                let Some(item) = next else { break };
                let Message::Binary(bytes) = item? else { continue };
                let (frame, _) = codec::decode(&bytes, &codec_config)?;
                handle_frame(&mut sink, &codec_config, &sequence, frame).await?;
            }
        }
    }

    info!("connection closed, exiting");
    Ok(())
}

async fn handle_frame<S>(
    sink: &mut S,
    codec_config: &CodecConfig,
    sequence: &SequenceCounter,
    frame: Frame,
) -> anyhow::Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match frame.frame_type {
        FrameType::Ping => {
            let pong = Frame::new(FrameType::Pong, frame.sequence_id, Method::Pong as u16, FrameFlags::empty(), Vec::new());
            send_frame(sink, codec_config, pong).await?;
        }
        FrameType::Notification if frame.method == Method::TaskAssigned as u16 => {
            let assigned: TaskAssignedNotification = serde_json::from_slice(&frame.payload)?;
            info!(task_id = %assigned.task_id, "received task assignment, simulating work");
            tokio::time::sleep(Duration::from_millis(200)).await;

            let complete = TaskCompleteRequest {
                task_id: assigned.task_id,
                result: serde_json::json!({ "ok": true }),
                duration_ms: 200,
                cost_usd: 0.01,
            };
            send_request(sink, codec_config, sequence, Method::TaskComplete, &complete).await?;
        }
        FrameType::Error => {
            warn!(method = frame.method, "received error frame from server");
        }
        _ => {}
    }
    Ok(())
}

async fn send_request<S, T>(
    sink: &mut S,
    codec_config: &CodecConfig,
    sequence: &SequenceCounter,
    method: Method,
    body: &T,
) -> anyhow::Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    T: serde::Serialize,
{
    let payload = serde_json::to_vec(body)?;
    let frame = Frame::new(FrameType::Request, sequence.next(), method as u16, FrameFlags::empty(), payload);
    send_frame(sink, codec_config, frame).await
}

async fn send_frame<S>(sink: &mut S, codec_config: &CodecConfig, frame: Frame) -> anyhow::Result<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let bytes = codec::encode(&frame, codec_config)?;
    sink.send(Message::Binary(bytes)).await?;
    Ok(())
}
