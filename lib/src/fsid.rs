//! The cluster identity type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AgentError;

/// A well-formed random 128-bit cluster identifier, rendered as a
/// lowercase hyphenated UUID everywhere it appears on disk or on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fsid(Uuid);

impl Fsid {
    /// Generate a new random FSID.
    pub fn generate() -> Self {
        Fsid(Uuid::new_v4())
    }
}

impl fmt::Display for Fsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Fsid {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Fsid)
            .map_err(|e| AgentError::usage(format!("invalid FSID {s:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let f = Fsid::generate();
        let s = f.to_string();
        let f2: Fsid = s.parse().unwrap();
        assert_eq!(f, f2);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("not-a-uuid".parse::<Fsid>().is_err());
    }
}
