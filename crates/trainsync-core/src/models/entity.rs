//! Owners of training versions.

use crate::error::{Result, TrainsyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a registry belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Style,
    Actor,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Style, EntityKind::Actor];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Style => "style",
            EntityKind::Actor => "actor",
        }
    }

    /// Directory name holding all registries of this kind. Also the storage
    /// listing prefix.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityKind::Style => "styles",
            EntityKind::Actor => "actors",
        }
    }

}

/// Accepts the singular and plural spellings, case-insensitively.
impl FromStr for EntityKind {
    type Err = TrainsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "style" | "styles" => Ok(EntityKind::Style),
            "actor" | "actors" => Ok(EntityKind::Actor),
            _ => Err(TrainsyncError::InvalidParams {
                message: format!("Unknown entity kind: {}", s),
            }),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies one registry: `(kind, entity id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub kind: EntityKind,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
        }
    }

    pub fn style(entity_id: impl Into<String>) -> Self {
        Self::new(EntityKind::Style, entity_id)
    }

    pub fn actor(entity_id: impl Into<String>) -> Self {
        Self::new(EntityKind::Actor, entity_id)
    }

    /// Entity ids are non-empty runs of ASCII digits. Anything else can
    /// neither be recovered from a job id nor safely used as a path segment.
    pub fn is_valid_id(entity_id: &str) -> bool {
        !entity_id.is_empty() && entity_id.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn validate(&self) -> Result<()> {
        if Self::is_valid_id(&self.entity_id) {
            Ok(())
        } else {
            Err(TrainsyncError::Validation {
                field: "entity_id".to_string(),
                message: format!("entity id must be numeric, got {:?}", self.entity_id),
            })
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.entity_id)
    }
}
