// Orchestrator lifecycle: readiness, health, allocation and drain

mod controller;
mod orchestrator;
mod restart;
mod state;

pub use controller::LifecycleController;
pub use orchestrator::{HttpSidecarClient, OrchestratorClient, OrchestratorSignal};
pub use restart::restart_process;
pub use state::LifecycleState;
