use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WarehouseError;

/// Identifier of a registered content source. Descriptor ids are lowercase
/// alphanumerics plus `.`, `_`, `-`; ids starting with `_` are reserved for
/// internal sentinels and never parse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

const PRIMARY_ID: &str = "__primary__";

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sentinel id of the primary source. Always last in priority and
    /// unconstructible through `FromStr`.
    pub fn primary() -> Self {
        Self(PRIMARY_ID.to_string())
    }

    pub fn is_primary(&self) -> bool {
        self.0 == PRIMARY_ID
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = WarehouseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let mut chars = normalized.chars();
        let valid_head = chars
            .next()
            .map(|ch| ch.is_ascii_alphanumeric())
            .unwrap_or(false);
        let valid_tail =
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-');
        if !valid_head || !valid_tail {
            return Err(WarehouseError::InvalidSourceId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Identity of a content unit to fetch: an opaque fingerprint such as
/// `rpm:zsh-5.0.2-3.x86_64` or `sha256:ab12...`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitKey(String);

impl UnitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnitKey {
    type Err = WarehouseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty() && !trimmed.chars().any(|ch| ch.is_whitespace());
        if !is_valid {
            return Err(WarehouseError::InvalidUnitKey(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}
