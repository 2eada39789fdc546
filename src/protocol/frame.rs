//! Frame types: the 24-byte header and the decoded in-memory representation
//! (spec §4.1 / §6 "Wire Protocol (bit-exact)").

use serde::{Deserialize, Serialize};

pub const MAGIC: u32 = 0x4D43_5057;
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 24;

pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;
pub const DEFAULT_COMPRESSION_MIN_BYTES: usize = 1024;

/// Frame `type` byte (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    Request = 0,
    Response = 1,
    Notification = 2,
    Error = 3,
    Ping = 4,
    Pong = 5,
    Batch = 6,
    Progress = 7,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => FrameType::Request,
            1 => FrameType::Response,
            2 => FrameType::Notification,
            3 => FrameType::Error,
            4 => FrameType::Ping,
            5 => FrameType::Pong,
            6 => FrameType::Batch,
            7 => FrameType::Progress,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Header flags (spec §4.1). Unknown bits are preserved but ignored by
    /// receivers for forward compatibility.
    #[derive(Serialize, Deserialize)]
    pub struct FrameFlags: u16 {
        const COMPRESSED = 0x0001;
        const ENCRYPTED   = 0x0002;
        const BATCH       = 0x0004;
        const PRIORITY    = 0x0008;
        const STREAMING   = 0x0010;
    }
}

/// The stable numeric method enumeration carried in the header (spec §4.3
/// method catalog). Numeric codes are an internal implementation detail;
/// the string identifiers in the table are what callers name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Method {
    AgentRegister = 1,
    AgentHeartbeat = 2,
    AgentCapabilityUpdate = 3,
    AgentShutdown = 4,
    TaskAssigned = 5,
    TaskProgress = 6,
    TaskComplete = 7,
    TaskFailed = 8,
    TaskCancel = 9,
    Ping = 10,
    Pong = 11,
}

impl Method {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => Method::AgentRegister,
            2 => Method::AgentHeartbeat,
            3 => Method::AgentCapabilityUpdate,
            4 => Method::AgentShutdown,
            5 => Method::TaskAssigned,
            6 => Method::TaskProgress,
            7 => Method::TaskComplete,
            8 => Method::TaskFailed,
            9 => Method::TaskCancel,
            10 => Method::Ping,
            11 => Method::Pong,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::AgentRegister => "agent.register",
            Method::AgentHeartbeat => "agent.heartbeat",
            Method::AgentCapabilityUpdate => "agent.capability.update",
            Method::AgentShutdown => "agent.shutdown",
            Method::TaskAssigned => "task.assigned",
            Method::TaskProgress => "task.progress",
            Method::TaskComplete => "task.complete",
            Method::TaskFailed => "task.failed",
            Method::TaskCancel => "task.cancel",
            Method::Ping => "ping",
            Method::Pong => "pong",
        }
    }
}

/// A decoded frame header plus its raw (already decompressed) payload
/// bytes. This is what the codec hands to the Session Router; JSON
/// decoding of the payload into a concrete method body happens there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub sequence_id: u64,
    pub method: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(
        frame_type: FrameType,
        sequence_id: u64,
        method: u16,
        flags: FrameFlags,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            frame_type,
            flags,
            sequence_id,
            method,
            payload,
        }
    }

    pub fn is_priority(&self) -> bool {
        self.flags.contains(FrameFlags::PRIORITY)
    }
}
