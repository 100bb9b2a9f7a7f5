// =============================================================================
// Shared types used across the Nova Scout service
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked token.
///
/// The only legal transitions are Monitored→Active, Active→Monitored and
/// Monitored→Archived. Archived tokens are inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Monitored,
    Active,
    Archived,
}

impl Default for TokenStatus {
    fn default() -> Self {
        Self::Monitored
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monitored => write!(f, "monitored"),
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl TokenStatus {
    /// Whether `self → to` is a legal lifecycle edge.
    pub fn can_transition_to(self, to: TokenStatus) -> bool {
        matches!(
            (self, to),
            (Self::Monitored, Self::Active)
                | (Self::Active, Self::Monitored)
                | (Self::Monitored, Self::Archived)
        )
    }
}

/// Why a token changed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChangeReason {
    /// First seen on the migration feed.
    Discovery,
    /// Activation thresholds met (liquidity, tx count, pool present).
    Activation,
    /// Smoothed score stayed below the floor for the configured window.
    LowScore,
    /// Too many consecutive low-activity checks.
    LowActivity,
    /// Aged out of Monitored without activating.
    ArchivalTimeout,
}

impl std::fmt::Display for StatusChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Activation => write!(f, "activation"),
            Self::LowScore => write!(f, "low_score"),
            Self::LowActivity => write!(f, "low_activity"),
            Self::ArchivalTimeout => write!(f, "archival_timeout"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_three_transitions_are_legal() {
        use TokenStatus::*;
        assert!(Monitored.can_transition_to(Active));
        assert!(Active.can_transition_to(Monitored));
        assert!(Monitored.can_transition_to(Archived));

        assert!(!Active.can_transition_to(Archived));
        assert!(!Archived.can_transition_to(Monitored));
        assert!(!Archived.can_transition_to(Active));
        assert!(!Monitored.can_transition_to(Monitored));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TokenStatus::Monitored).unwrap(),
            "\"monitored\""
        );
        assert_eq!(
            serde_json::to_string(&StatusChangeReason::ArchivalTimeout).unwrap(),
            "\"archival_timeout\""
        );
    }
}
