//! Agentmesh — coordination and task assignment subsystem for a fleet of
//! worker agents: binary wire protocol, connection lifecycle, agent
//! registry, pluggable assignment engine, cost gate and durable queueing.

pub mod assignment;
pub mod audit_logging;
pub mod clock;
pub mod connection;
pub mod cost;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod router;
pub mod tasks;
pub mod transport;

pub use platform::{Platform, PlatformConfig, PlatformContext, PlatformRuntime};
