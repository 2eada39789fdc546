//! C5 Task Store (spec §3 "Task", §4.5).

pub mod model;
pub mod pg_store;
pub mod store;
pub mod sweeper;

pub use model::{AssignmentRecord, NewTask, RejectReason, RequiredCapability, Task, TaskStatus};
pub use pg_store::PostgresTaskStore;
pub use store::{InMemoryTaskStore, SharedTaskStore, SubmitOutcome, TaskEvent, TaskStore};
pub use sweeper::spawn_deadline_sweeper;
