use serde::Serialize;

/// Host lifecycle as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unregistered,
    Ready,
    Allocated,
    Draining,
    ShuttingDown,
}

impl LifecycleState {
    /// Forward successors only, plus Ready -> Draining for an instance that
    /// was never allocated.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Unregistered, Ready)
                | (Ready, Allocated)
                | (Ready, Draining)
                | (Allocated, Draining)
                | (Draining, ShuttingDown)
        )
    }

    /// States in which health is reported
    pub fn reports_health(self) -> bool {
        matches!(self, LifecycleState::Ready | LifecycleState::Allocated)
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::ShuttingDown
    }
}
