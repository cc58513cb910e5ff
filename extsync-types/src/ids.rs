//! Extension identifiers.
//!
//! An extension is named by a case-insensitive `publisher.name` id and,
//! when the gallery knows it, a stable uuid. Two identifiers denote the same
//! extension iff their uuids match when both are present, otherwise iff their
//! ids match ignoring case.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Identifies an extension.
///
/// `PartialEq` is structural. Use [`ExtensionIdentifier::is_same`] for the
/// identity-equivalence rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtensionIdentifier {
    /// `publisher.name`, compared case-insensitively.
    pub id: String,
    /// Gallery uuid, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl ExtensionIdentifier {
    /// Creates an identifier without a uuid.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: None,
        }
    }

    /// Creates an identifier with a gallery uuid.
    #[must_use]
    pub fn with_uuid(id: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: Some(uuid.into()),
        }
    }

    /// Parses an identifier from a `publisher.name` string.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidIdentifier(s.to_string()));
        }
        Ok(Self::new(trimmed))
    }

    /// Returns the id lowercased, the form used for comparison and ordering.
    #[must_use]
    pub fn normalized_id(&self) -> String {
        self.id.to_lowercase()
    }

    /// Returns true if `id` names this extension, ignoring case.
    #[must_use]
    pub fn matches_id(&self, id: &str) -> bool {
        self.normalized_id() == id.to_lowercase()
    }

    /// Identity equivalence: uuids when both sides carry one, ids otherwise.
    #[must_use]
    pub fn is_same(&self, other: &ExtensionIdentifier) -> bool {
        match (&self.uuid, &other.uuid) {
            (Some(a), Some(b)) => a == b,
            _ => self.matches_id(&other.id),
        }
    }

    /// Canonical ordering: lowercased id, then uuid.
    #[must_use]
    pub fn canonical_cmp(&self, other: &ExtensionIdentifier) -> Ordering {
        self.normalized_id()
            .cmp(&other.normalized_id())
            .then_with(|| self.uuid.cmp(&other.uuid))
    }
}

impl fmt::Display for ExtensionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for ExtensionIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Hashable identity key.
///
/// The merge engine resolves each identifier to a key once, preferring a uuid
/// learned from any of the snapshots being compared, so that entries that
/// are the same extension collapse onto one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtensionKey {
    Uuid(String),
    Id(String),
}

impl ExtensionKey {
    /// Key for an identifier on its own, without any learned uuid.
    #[must_use]
    pub fn of(identifier: &ExtensionIdentifier) -> Self {
        match &identifier.uuid {
            Some(uuid) => Self::Uuid(uuid.clone()),
            None => Self::Id(identifier.normalized_id()),
        }
    }

    /// Returns the uuid if this is a uuid key.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Self::Uuid(uuid) => Some(uuid),
            Self::Id(_) => None,
        }
    }
}

impl fmt::Display for ExtensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "uuid:{uuid}"),
            Self::Id(id) => write!(f, "id:{id}"),
        }
    }
}
