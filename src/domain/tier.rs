use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DuelbetError;

/// Skill bracket a contest belongs to.
///
/// Stats, predictors and memoized vectors are all segmented by tier. The
/// discriminant order is the numeric tier index fed into betting vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    P,
    B,
    A,
    S,
    X,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::P, Tier::B, Tier::A, Tier::S, Tier::X];

    pub fn index(&self) -> usize {
        match self {
            Tier::P => 0,
            Tier::B => 1,
            Tier::A => 2,
            Tier::S => 3,
            Tier::X => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::P => "P",
            Tier::B => "B",
            Tier::A => "A",
            Tier::S => "S",
            Tier::X => "X",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DuelbetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "P" => Ok(Tier::P),
            "B" => Ok(Tier::B),
            "A" => Ok(Tier::A),
            "S" => Ok(Tier::S),
            "X" => Ok(Tier::X),
            other => Err(DuelbetError::UnknownTier(other.to_string())),
        }
    }
}

/// Game mode reported by the live feed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Matchmaking,
    Tournament,
    Exhibition,
    Unknown(String),
}

impl Mode {
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "matchmaking" => Mode::Matchmaking,
            "tournament" => Mode::Tournament,
            "exhibition" | "exhibitions" => Mode::Exhibition,
            other => Mode::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Mode::Matchmaking => "matchmaking",
            Mode::Tournament => "tournament",
            Mode::Exhibition => "exhibitions",
            Mode::Unknown(label) => label,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_index_follows_bracket_order() {
        let indices: Vec<usize> = Tier::ALL.iter().map(Tier::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn parses_known_tiers_only() {
        assert_eq!("S".parse::<Tier>().unwrap(), Tier::S);
        assert_eq!(" X ".parse::<Tier>().unwrap(), Tier::X);
        assert!("Z".parse::<Tier>().is_err());
        assert!("".parse::<Tier>().is_err());
    }

    #[test]
    fn mode_labels() {
        assert_eq!(Mode::parse("tournament"), Mode::Tournament);
        assert_eq!(Mode::parse("exhibitions"), Mode::Exhibition);
        assert_eq!(Mode::parse("weird"), Mode::Unknown("weird".to_string()));
        assert_eq!(Mode::Matchmaking.as_str(), "matchmaking");
    }
}
