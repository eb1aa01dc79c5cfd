//! Crossgrade stages

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three ordered phases of a crossgrade session.
///
/// Ordering follows execution order, so `Stage::First < Stage::Second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Boot-critical packages
    First,
    /// Every remaining package
    Second,
    /// Removal of the old architecture
    Third,
}

impl Stage {
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::First => Some(Self::Second),
            Self::Second => Some(Self::Third),
            Self::Third => None,
        }
    }

    #[must_use]
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::First => None,
            Self::Second => Some(Self::First),
            Self::Third => Some(Self::Second),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "stage one"),
            Self::Second => write!(f, "stage two"),
            Self::Third => write!(f, "stage three"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::First < Stage::Second);
        assert!(Stage::Second < Stage::Third);
        assert_eq!(Stage::First.next(), Some(Stage::Second));
        assert_eq!(Stage::Third.next(), None);
        assert_eq!(Stage::Third.previous(), Some(Stage::Second));
    }
}
