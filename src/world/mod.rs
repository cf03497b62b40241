// World instance registry: binds sessions to world instances

mod instance;
mod registry;

pub use instance::{WorldHandle, WorldInstance, WorldStatus, WorldSummary};
pub use registry::{WorldEvent, WorldRegistry};
