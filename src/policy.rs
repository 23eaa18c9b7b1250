// src/policy.rs
//! Per-dependency failure policy.
//!
//! Reads default to open, the rate limiter to closed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnUnavailable {
    /// Proceed as if the dependency had answered "allowed" / "miss".
    FailOpen,
    /// Surface the outage to the caller.
    FailClosed,
}

impl OnUnavailable {
    pub fn is_open(self) -> bool {
        matches!(self, OnUnavailable::FailOpen)
    }
}

impl std::str::FromStr for OnUnavailable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" | "fail_open" | "failopen" => Ok(OnUnavailable::FailOpen),
            "closed" | "fail_closed" | "failclosed" => Ok(OnUnavailable::FailClosed),
            other => Err(format!("Unknown failure policy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("open".parse::<OnUnavailable>(), Ok(OnUnavailable::FailOpen));
        assert_eq!("Closed".parse::<OnUnavailable>(), Ok(OnUnavailable::FailClosed));
        assert!("maybe".parse::<OnUnavailable>().is_err());
    }
}
