//! Worker threads, the message protocol between them and the orchestrator,
//! and the bounded pool that hands them out.

pub mod pool;
pub mod protocol;
pub mod worker;

pub use pool::{PooledWorker, WorkerPool};
pub use protocol::{Request, Response};
pub use worker::{WorkerHandle, WorkerState};
