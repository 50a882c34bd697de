pub mod comm;
pub mod control;
pub mod dht;
pub mod dispatch;
pub mod error;
pub mod object;
pub mod receiver;
pub mod sender;
pub mod services;
pub mod wire;

// Re-export commonly used types
pub use comm::{Comm, LocalMesh, TcpComm};
pub use control::{ControlOptions, DistributedControl};
pub use dht::DeltaDht;
pub use dispatch::DispatchId;
pub use error::RpcError;
pub use object::{DistObject, ObjectPort};
pub use wire::PacketType;
