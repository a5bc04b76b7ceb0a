use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::InvalidPlatformCode;
use super::stage::Stage;

/// Lower-case platform identifier as it appears in request paths (`boss`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlatformCode(String);

impl PlatformCode {
    pub fn new(code: impl AsRef<str>) -> Result<Self, InvalidPlatformCode> {
        let code = code.as_ref().trim();
        let valid = !code.is_empty()
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(InvalidPlatformCode(code.to_string()));
        }
        Ok(Self(code.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Composite snapshot key, e.g. `BOSS_LOGIN`.
    pub fn status_key(&self, stage: Stage) -> String {
        format!("{}_{}", self.0.to_ascii_uppercase(), stage.key_suffix())
    }
}

/// Splits a composite snapshot key into its platform and stage.
///
/// Platform codes may contain underscores, so the stage is taken from the last segment.
pub fn parse_status_key(key: &str) -> Option<(PlatformCode, Stage)> {
    let (platform, suffix) = key.rsplit_once('_')?;
    let stage = Stage::from_key_suffix(suffix)?;
    let platform = PlatformCode::new(platform).ok()?;
    Some((platform, stage))
}

impl fmt::Display for PlatformCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlatformCode {
    type Err = InvalidPlatformCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PlatformCode {
    type Error = InvalidPlatformCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PlatformCode> for String {
    fn from(code: PlatformCode) -> Self {
        code.0
    }
}
