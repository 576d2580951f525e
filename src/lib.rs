//! Autonomous task execution engine.
//!
//! Admits units of work (shell commands or scripts), orders them by
//! priority, deadline, and dependency readiness, dispatches them to a
//! bounded worker pool, tracks their lifecycle durably in SQLite, retries
//! bounded failures, escalates overdue tasks, and raises operational
//! alerts on stalled/overdue work.

pub mod config;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod types;

pub use error::{EngineError, Result};
pub use queue::TaskQueue;
pub use scheduler::Scheduler;
pub use store::Store;
