use std::fmt;

/// Lifecycle state of one worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Pre-caching the manifest into a new generation
    Installing,
    /// Installed; waiting for the previous version to release its clients
    Waiting,
    /// Intercepting requests from controlled clients
    Active,
    /// Superseded or failed to install; intercepts nothing
    Redundant,
}

impl WorkerState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Installing, Waiting)
                | (Waiting, Active)
                | (Installing, Redundant)
                | (Waiting, Redundant)
                | (Active, Redundant)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Redundant
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerState::*;

    #[test]
    fn forward_transitions_only() {
        assert!(Installing.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Active));
        assert!(Active.can_transition_to(Redundant));
        assert!(!Active.can_transition_to(Waiting));
        assert!(!Installing.can_transition_to(Active));
        assert!(!Redundant.can_transition_to(Installing));
        assert!(Redundant.is_terminal());
    }
}
