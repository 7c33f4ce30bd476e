use crate::ContractError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn components(&self) -> [u32; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Accepts `major.minor.patch`; the patch may carry a pre-release or build
/// suffix (`0.19.0rc1`, `0.19.0-dev.2`) which does not take part in ordering.
impl FromStr for Version {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| ContractError::MalformedVersion {
            input: input.to_string(),
            reason,
        };

        let mut parts = input.trim().splitn(3, '.');
        let (Some(major), Some(minor), Some(patch)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected major.minor.patch"));
        };

        let major = parse_component(major).ok_or_else(|| malformed("invalid major component"))?;
        let minor = parse_component(minor).ok_or_else(|| malformed("invalid minor component"))?;

        let digits_end = patch
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(patch.len());
        let (digits, suffix) = patch.split_at(digits_end);
        if let Some(first) = suffix.chars().next() {
            if !(first == '-' || first == '+' || first.is_ascii_alphabetic()) {
                return Err(malformed("invalid patch suffix"));
            }
        }
        let patch = parse_component(digits).ok_or_else(|| malformed("invalid patch component"))?;

        Ok(Version::new(major, minor, patch))
    }
}

fn parse_component(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
