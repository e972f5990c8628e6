//! Leadership state of one node

use serde::{Deserialize, Serialize};

/// This node's belief about its role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadershipState {
    /// No claim attempted yet, or its outcome is pending
    Running,
    /// This node holds the election node
    Elected,
    /// Another node holds the election node
    NotElected,
}

impl LeadershipState {
    pub fn is_leader(&self) -> bool {
        matches!(self, LeadershipState::Elected)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            LeadershipState::Running => 0,
            LeadershipState::Elected => 1,
            LeadershipState::NotElected => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => LeadershipState::Elected,
            2 => LeadershipState::NotElected,
            _ => LeadershipState::Running,
        }
    }
}

impl std::fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipState::Running => write!(f, "running"),
            LeadershipState::Elected => write!(f, "elected"),
            LeadershipState::NotElected => write!(f, "not-elected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_stable() {
        for state in [
            LeadershipState::Running,
            LeadershipState::Elected,
            LeadershipState::NotElected,
        ] {
            assert_eq!(LeadershipState::from_u8(state.to_u8()), state);
        }
        assert_eq!(LeadershipState::from_u8(42), LeadershipState::Running);
    }

    #[test]
    fn test_only_elected_leads() {
        assert!(LeadershipState::Elected.is_leader());
        assert!(!LeadershipState::NotElected.is_leader());
        assert!(!LeadershipState::Running.is_leader());
    }
}
