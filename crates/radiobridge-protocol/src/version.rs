//! HAL interface versions.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A radio HAL interface version (`major.minor`).
///
/// Versions are totally ordered; a request issued at version `v` uses the
/// wire representation introduced in `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HalVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl HalVersion {
    pub const V1_0: HalVersion = HalVersion::new(1, 0);
    pub const V1_1: HalVersion = HalVersion::new(1, 1);
    pub const V1_2: HalVersion = HalVersion::new(1, 2);
    pub const V1_3: HalVersion = HalVersion::new(1, 3);
    pub const V1_4: HalVersion = HalVersion::new(1, 4);
    pub const V1_5: HalVersion = HalVersion::new(1, 5);
    pub const V1_6: HalVersion = HalVersion::new(1, 6);

    /// Create a version.
    pub const fn new(major: u8, minor: u8) -> Self {
        HalVersion { major, minor }
    }
}

impl std::fmt::Display for HalVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for HalVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidVersion(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        let major = major.parse().map_err(|_| invalid())?;
        let minor = minor.parse().map_err(|_| invalid())?;
        Ok(HalVersion::new(major, minor))
    }
}

impl TryFrom<String> for HalVersion {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HalVersion> for String {
    fn from(version: HalVersion) -> Self {
        version.to_string()
    }
}

/// The ascending list of versions this build can speak for one request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionLadder(&'static [HalVersion]);

impl VersionLadder {
    /// Wrap a static, ascending, non-empty version list.
    pub const fn new(versions: &'static [HalVersion]) -> Self {
        VersionLadder(versions)
    }

    /// All versions, lowest first.
    pub fn versions(&self) -> &'static [HalVersion] {
        self.0
    }

    /// Highest version on the ladder.
    pub fn highest(&self) -> Option<HalVersion> {
        self.0.last().copied()
    }

    /// Lowest version on the ladder.
    pub fn lowest(&self) -> Option<HalVersion> {
        self.0.first().copied()
    }

    /// Highest rung at or below `cap`.
    pub fn highest_at_or_below(&self, cap: HalVersion) -> Option<HalVersion> {
        self.0.iter().rev().find(|v| **v <= cap).copied()
    }

    /// Highest rung strictly below `version`.
    pub fn below(&self, version: HalVersion) -> Option<HalVersion> {
        self.0.iter().rev().find(|v| **v < version).copied()
    }

    /// Whether `version` is one of the rungs.
    pub fn contains(&self, version: HalVersion) -> bool {
        self.0.contains(&version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LADDER: VersionLadder =
        VersionLadder::new(&[HalVersion::V1_0, HalVersion::V1_2, HalVersion::V1_4]);

    #[test]
    fn test_parse_and_display() {
        let v: HalVersion = "1.4".parse().unwrap();
        assert_eq!(v, HalVersion::V1_4);
        assert_eq!(v.to_string(), "1.4");
        assert_eq!(" 2.10 ".parse::<HalVersion>().unwrap(), HalVersion::new(2, 10));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("14".parse::<HalVersion>().is_err());
        assert!("1.x".parse::<HalVersion>().is_err());
        assert!("".parse::<HalVersion>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(HalVersion::V1_0 < HalVersion::V1_6);
        assert!(HalVersion::new(2, 0) > HalVersion::V1_6);
    }

    #[test]
    fn test_ladder_steps() {
        assert_eq!(LADDER.highest(), Some(HalVersion::V1_4));
        assert_eq!(LADDER.below(HalVersion::V1_4), Some(HalVersion::V1_2));
        assert_eq!(LADDER.below(HalVersion::V1_2), Some(HalVersion::V1_0));
        assert_eq!(LADDER.below(HalVersion::V1_0), None);
        // Versions between rungs step down to the next rung
        assert_eq!(LADDER.below(HalVersion::V1_3), Some(HalVersion::V1_2));
    }

    #[test]
    fn test_ladder_cap() {
        assert_eq!(LADDER.highest_at_or_below(HalVersion::V1_6), Some(HalVersion::V1_4));
        assert_eq!(LADDER.highest_at_or_below(HalVersion::V1_3), Some(HalVersion::V1_2));
        assert_eq!(LADDER.highest_at_or_below(HalVersion::new(0, 9)), None);
    }

    #[test]
    fn test_serde_string_form() {
        let v: HalVersion = serde_yaml::from_str("\"1.5\"").unwrap();
        assert_eq!(v, HalVersion::V1_5);
        assert!(serde_yaml::from_str::<HalVersion>("\"one\"").is_err());
    }
}
