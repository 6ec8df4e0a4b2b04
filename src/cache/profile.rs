//! Named freshness windows.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const SECOND: u64 = 1;
const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const MAX: u64 = 30 * DAY;

/// Preset freshness windows, coarsest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessProfile {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Max,
}

impl FreshnessProfile {
    pub const ALL: [FreshnessProfile; 6] = [
        Self::Seconds,
        Self::Minutes,
        Self::Hours,
        Self::Days,
        Self::Weeks,
        Self::Max,
    ];

    pub fn window(self) -> Duration {
        let secs = match self {
            Self::Seconds => SECOND,
            Self::Minutes => MINUTE,
            Self::Hours => HOUR,
            Self::Days => DAY,
            Self::Weeks => WEEK,
            Self::Max => MAX,
        };
        Duration::from_secs(secs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for FreshnessProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FreshnessProfile> for Duration {
    fn from(profile: FreshnessProfile) -> Self {
        profile.window()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown freshness profile `{0}` (expected seconds|minutes|hours|days|weeks|max)")]
pub struct UnknownProfile(pub String);

impl FromStr for FreshnessProfile {
    type Err = UnknownProfile;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|profile| profile.as_str() == normalized)
            .ok_or_else(|| UnknownProfile(value.to_string()))
    }
}
