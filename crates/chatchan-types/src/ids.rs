//! String-serializable identifiers for channels and accounts.
//!
//! Both ids travel through the store as plain text (`DM:42:1`, `UA:alice`),
//! so parsing is strict: a row that fails to parse is corrupt data, not input
//! to be guessed at.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("identifier is empty")]
    Empty,
    #[error("unexpected identifier format: {0}")]
    Format(String),
    #[error("unknown identifier kind: {0}")]
    Kind(String),
    #[error("invalid number in identifier {input}: {field}")]
    Number { input: String, field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// One-to-one conversation.
    Dm,
    /// Group conversation.
    Gr,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "DM",
            Self::Gr => "GR",
        }
    }
}

impl FromStr for ChannelKind {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DM" => Ok(Self::Dm),
            "GR" => Ok(Self::Gr),
            other => Err(ParseIdError::Kind(other.to_string())),
        }
    }
}

/// Channel identity. The partition is part of the id so that any holder of a
/// channel id can route to the store owning its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId {
    pub kind: ChannelKind,
    pub id: i64,
    pub partition: u32,
}

impl ChannelId {
    pub fn new(kind: ChannelKind, id: i64, partition: u32) -> Self {
        Self { kind, id, partition }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind.as_str(), self.id, self.partition)
    }
}

impl FromStr for ChannelId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIdError::Empty);
        }

        let parts: Vec<&str> = s.split(':').collect();
        let [kind, id, partition] = parts.as_slice() else {
            return Err(ParseIdError::Format(s.to_string()));
        };

        let id = id.parse::<i64>().map_err(|_| ParseIdError::Number {
            input: s.to_string(),
            field: "id",
        })?;
        let partition = partition.parse::<u32>().map_err(|_| ParseIdError::Number {
            input: s.to_string(),
            field: "partition",
        })?;

        Ok(Self {
            kind: kind.parse()?,
            id,
            partition,
        })
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelId> for String {
    fn from(value: ChannelId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountKind {
    /// Regular user account.
    Ua,
}

impl AccountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ua => "UA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId {
    pub kind: AccountKind,
    pub name: String,
}

impl AccountId {
    /// Build a user account id. The name must be non-empty and free of `:`.
    pub fn user(name: impl Into<String>) -> Result<Self, ParseIdError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ParseIdError::Empty);
        }
        if name.contains(':') {
            return Err(ParseIdError::Format(name));
        }
        Ok(Self {
            kind: AccountKind::Ua,
            name,
        })
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

impl FromStr for AccountId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIdError::Empty);
        }

        let Some((kind, name)) = s.split_once(':') else {
            return Err(ParseIdError::Format(s.to_string()));
        };

        match kind {
            "UA" => Self::user(name),
            other => Err(ParseIdError::Kind(other.to_string())),
        }
    }
}

impl TryFrom<String> for AccountId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.to_string()
    }
}
