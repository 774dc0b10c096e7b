//! Severity levels

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Level written on request log lines. It sits outside the severity ranking
/// and is never gated.
pub const HTTP_REQUEST_LEVEL: &str = "httprequest";

/// Application log severity, most severe first
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Level {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl Level {
    /// Ordinal rank; lower is more severe
    pub fn rank(self) -> u8 {
        match self {
            Level::Error => 0,
            Level::Warn => 1,
            Level::Info => 2,
            Level::Debug => 3,
        }
    }

    /// Whether a call at `level` passes a gate whose maximum is `self`
    pub fn admits(self, level: Level) -> bool {
        level.rank() <= self.rank()
    }

    /// Upper-case label used on console lines
    pub fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}
