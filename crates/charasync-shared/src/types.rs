use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A user as the relay knows them. Identity is the UID; the alias is a
/// vanity name the user may or may not have set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub uid: String,
    pub alias: Option<String>,
}

impl UserData {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            alias: None,
        }
    }

    pub fn with_alias(uid: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            alias: Some(alias.into()),
        }
    }

    /// The alias when one is set and non-blank, otherwise the UID.
    pub fn alias_or_uid(&self) -> &str {
        match &self.alias {
            Some(alias) if !alias.trim().is_empty() => alias,
            _ => &self.uid,
        }
    }
}

impl PartialEq for UserData {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for UserData {}

impl std::hash::Hash for UserData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

/// A syncshell (group) as the relay knows it. Identity is the GID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupData {
    pub gid: String,
    pub alias: Option<String>,
}

impl GroupData {
    pub fn new(gid: impl Into<String>) -> Self {
        Self {
            gid: gid.into(),
            alias: None,
        }
    }

    /// The alias when one is set and non-blank, otherwise the GID.
    pub fn alias_or_gid(&self) -> &str {
        match &self.alias {
            Some(alias) if !alias.trim().is_empty() => alias,
            _ => &self.gid,
        }
    }
}

impl PartialEq for GroupData {
    fn eq(&self, other: &Self) -> bool {
        self.gid == other.gid
    }
}

impl Eq for GroupData {}

impl std::hash::Hash for GroupData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.gid.hash(state);
    }
}

/// BLAKE3 content fingerprint of a file, as lowercase hex.
///
/// The hash is the sole identity of a file: equal hash means
/// interchangeable content, and it doubles as the integrity check after
/// transfer. Deserialization goes through [`FileHash::parse`], so a
/// constructed value is always exactly 64 lowercase hex chars — store
/// paths built from it cannot traverse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Hash file content.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    /// Parse a hash received over the wire. Must be 64 lowercase hex chars.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        if s.len() != 64 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(ProtocolError::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl TryFrom<String> for FileHash {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        FileHash::parse(&s)
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Health of the single logical relay session. Exactly one value holds
/// at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Offline,
    Connecting,
    Reconnecting,
    Disconnecting,
    Disconnected,
    Connected,
    /// Credential rejected or revoked. Terminal until the user supplies
    /// a new secret key.
    Unauthorized,
    /// Client and server protocol versions diverge. Terminal until an
    /// upgrade.
    VersionMisMatch,
    /// The relay refused the connection attempt due to rate limiting.
    RateLimited,
    /// No credential is configured at all.
    NoSecretKey,
    /// Local policy forbids connecting more than one game character.
    MultiChara,
}

impl ServerState {
    /// States that end a connection attempt and require user action
    /// rather than automatic retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerState::Unauthorized
                | ServerState::VersionMisMatch
                | ServerState::RateLimited
                | ServerState::NoSecretKey
                | ServerState::MultiChara
        )
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
