use serde::{Deserialize, Serialize};
use std::fmt;

/// Wager lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    /// Accepting guesses until the close time
    Active,
    /// Window closed, funds in escrow, waiting for the outcome
    Pending,
    /// Winning choice set and payouts applied
    Resolved,
    /// Cancelled, every entrant refunded
    Washed,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Active => "active",
            BetStatus::Pending => "pending",
            BetStatus::Resolved => "resolved",
            BetStatus::Washed => "washed",
        }
    }

    /// Check if this status can transition to another status
    pub fn can_transition_to(&self, target: BetStatus) -> bool {
        use BetStatus::*;

        match (self, target) {
            // Window closes with at least two distinct guesses
            (Active, Pending) => true,
            // Window closes without a contest
            (Active, Washed) => true,

            (Pending, Resolved) => true,
            (Pending, Washed) => true,

            // Terminal states never move
            _ => false,
        }
    }

    /// Get valid next statuses from the current status
    pub fn valid_transitions(&self) -> Vec<BetStatus> {
        use BetStatus::*;

        match self {
            Active => vec![Pending, Washed],
            Pending => vec![Resolved, Washed],
            Resolved | Washed => vec![],
        }
    }

    /// Position in the lifecycle; never decreases for a given wager
    pub fn rank(&self) -> u8 {
        match self {
            BetStatus::Active => 0,
            BetStatus::Pending => 1,
            BetStatus::Resolved | BetStatus::Washed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Resolved | BetStatus::Washed)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for BetStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(BetStatus::Active),
            "pending" => Ok(BetStatus::Pending),
            "resolved" => Ok(BetStatus::Resolved),
            "washed" => Ok(BetStatus::Washed),
            _ => Err(format!("Unknown bet status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(BetStatus::Active.can_transition_to(BetStatus::Pending));
        assert!(BetStatus::Active.can_transition_to(BetStatus::Washed));
        assert!(BetStatus::Pending.can_transition_to(BetStatus::Resolved));
        assert!(BetStatus::Pending.can_transition_to(BetStatus::Washed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!BetStatus::Active.can_transition_to(BetStatus::Resolved));
        assert!(!BetStatus::Pending.can_transition_to(BetStatus::Active));
        assert!(!BetStatus::Resolved.can_transition_to(BetStatus::Washed));
        assert!(!BetStatus::Washed.can_transition_to(BetStatus::Pending));
    }

    #[test]
    fn test_transitions_never_lower_rank() {
        for status in [
            BetStatus::Active,
            BetStatus::Pending,
            BetStatus::Resolved,
            BetStatus::Washed,
        ] {
            for next in status.valid_transitions() {
                assert!(next.rank() > status.rank(), "{status} -> {next}");
            }
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for status in [BetStatus::Active, BetStatus::Pending, BetStatus::Washed] {
            assert_eq!(BetStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(BetStatus::try_from("settled").is_err());
    }
}
