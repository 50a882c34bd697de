pub mod config;
pub mod deferred_rwlock;
pub mod error;
pub mod graph;
pub mod id;
pub mod queue;
pub mod shared;

// Re-export commonly used types
pub use config::{EngineConfig, EngineKind, OptionsMap, SchedulerSpec, ScopeRange};
pub use deferred_rwlock::{DeferredRwLock, Granted, LockKind};
pub use error::{ConfigError, CoreError};
pub use graph::DirectedGraph;
pub use id::{Color, EdgeId, ProcId, VertexId};
pub use queue::BlockingQueue;
pub use shared::SharedData;
