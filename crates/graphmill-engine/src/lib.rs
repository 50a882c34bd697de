pub mod engine;
pub mod error;
pub mod scheduler;
pub mod scope;
pub mod task;

// Re-export commonly used types
pub use engine::{create_engine, AsyncEngine, ExecutionStatus, GraphEngine, StopHandle, SyncEngine};
pub use error::EngineError;
pub use scheduler::{
    create_scheduler, Monitor, SchedStatus, Scheduler, TaskPoster, Terminator, WorkerId,
};
pub use scope::{ScopeFactory, ScopeRange, VertexScope};
pub use task::{UpdateFn, UpdateTask};
