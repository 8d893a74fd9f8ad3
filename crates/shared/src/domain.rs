use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ChatId);
id_newtype!(OperatorId);

/// Account key: a phone number with the leading `+` and surrounding
/// whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phone(String);

impl Phone {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().trim_start_matches('+');
        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidPhone(raw.trim().to_string()));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Phone {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Opaque reusable session credential exported by the remote client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MassAction {
    #[serde(alias = "subscribe")]
    Join,
    #[serde(alias = "unsubscribe")]
    Leave,
}

impl MassAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

impl fmt::Display for MassAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MassAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "join" | "subscribe" => Ok(Self::Join),
            "leave" | "unsubscribe" => Ok(Self::Leave),
            other => Err(ValidationError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    MassJoin,
    MassLeave,
    Broadcast,
}

impl From<MassAction> for OperationKind {
    fn from(value: MassAction) -> Self {
        match value {
            MassAction::Join => Self::MassJoin,
            MassAction::Leave => Self::MassLeave,
        }
    }
}

const LINK_PREFIXES: &[&str] = &["https://t.me/", "http://t.me/", "t.me/", "@"];
const LEGACY_INVITE_PREFIX: &str = "joinchat/";

/// A chat link exactly as the operator typed it. The raw text is the ledger
/// key; [`TargetLink::resolve`] yields what the remote client is called with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetLink(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Private invite; holds the hash without the leading `+`.
    Invite(String),
    /// Public username or numeric identifier.
    Public(String),
}

impl TargetLink {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        let link = Self(raw.to_string());
        if link.normalized().is_empty() || link.normalized() == "+" {
            return Err(ValidationError::EmptyLink);
        }
        Ok(link)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn normalized(&self) -> &str {
        let mut rest = self.0.trim();
        for prefix in LINK_PREFIXES {
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped;
            }
        }
        rest.trim_end_matches('/')
    }

    pub fn is_invite(&self) -> bool {
        matches!(self.resolve(), LinkTarget::Invite(_))
    }

    pub fn resolve(&self) -> LinkTarget {
        let normalized = self.normalized();
        if let Some(hash) = normalized.strip_prefix('+') {
            return LinkTarget::Invite(hash.to_string());
        }
        if let Some(hash) = normalized.strip_prefix(LEGACY_INVITE_PREFIX) {
            return LinkTarget::Invite(hash.to_string());
        }
        LinkTarget::Public(normalized.to_string())
    }

    /// What a chat lookup is called with: `+<hash>` for any invite form,
    /// the bare name otherwise.
    pub fn lookup_key(&self) -> String {
        match self.resolve() {
            LinkTarget::Invite(hash) => format!("+{hash}"),
            LinkTarget::Public(name) => name,
        }
    }
}

impl fmt::Display for TargetLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
