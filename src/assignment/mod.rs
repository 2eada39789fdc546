//! C6 Assignment Engine (spec §4.6).

pub mod candidate;
pub mod dispatcher;
pub mod engine;
pub mod retry;
pub mod strategies;

pub use dispatcher::{spawn_assignment_loop, submit_task, DispatcherConfig};
pub use engine::{AssignmentEngine, AssignmentFailure, AssignmentOutcome};
pub use retry::{backoff_with_jitter, RetryConfig};
pub use strategies::capability_match::CapabilityMatch;
pub use strategies::cost_optimized::CostOptimized;
pub use strategies::least_loaded::LeastLoaded;
pub use strategies::performance_based::PerformanceBased;
pub use strategies::round_robin::RoundRobin;
pub use strategies::AssignmentStrategy;
