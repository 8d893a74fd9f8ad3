use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{ChatId, Phone, SessionCredential};
use thiserror::Error;

/// Recipient used by idle activity: the account's own saved-messages chat.
pub const SELF_TARGET: &str = "me";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatRef {
    Id(ChatId),
    Name(String),
}

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Server-issued token tying a sign-in attempt to the code that was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("already a participant")]
    AlreadyParticipant,
    #[error("not a participant")]
    NotParticipant,
    #[error("join request sent")]
    JoinRequestSent,
    #[error("username is not occupied")]
    UsernameNotOccupied,
    #[error("channel is invalid")]
    ChannelInvalid,
    #[error("channel is private")]
    ChannelPrivate,
    #[error("invite link is invalid")]
    InviteHashInvalid,
    #[error("invite link has expired")]
    InviteHashExpired,
    #[error("two-step password required")]
    PasswordRequired,
    #[error("verification code is invalid")]
    InvalidCode,
    #[error("remote error: {0}")]
    Other(String),
}

/// What an executor does with a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected protocol outcome recoded as success.
    Benign,
    /// The chat cannot be reached (missing, private or invalid).
    ChatUnavailable,
    /// The invite link is no longer usable.
    InviteUnusable,
    Failure,
}

impl RemoteError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyParticipant | Self::NotParticipant | Self::JoinRequestSent => {
                ErrorClass::Benign
            }
            Self::UsernameNotOccupied | Self::ChannelInvalid | Self::ChannelPrivate => {
                ErrorClass::ChatUnavailable
            }
            Self::InviteHashInvalid | Self::InviteHashExpired => ErrorClass::InviteUnusable,
            Self::PasswordRequired | Self::InvalidCode | Self::Other(_) => ErrorClass::Failure,
        }
    }

    /// Wire code used by the gateway for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyParticipant => "user_already_participant",
            Self::NotParticipant => "user_not_participant",
            Self::JoinRequestSent => "invite_request_sent",
            Self::UsernameNotOccupied => "username_not_occupied",
            Self::ChannelInvalid => "channel_invalid",
            Self::ChannelPrivate => "channel_private",
            Self::InviteHashInvalid => "invite_hash_invalid",
            Self::InviteHashExpired => "invite_hash_expired",
            Self::PasswordRequired => "session_password_needed",
            Self::InvalidCode => "phone_code_invalid",
            Self::Other(_) => "other",
        }
    }

    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        match code {
            "user_already_participant" => Self::AlreadyParticipant,
            "user_not_participant" => Self::NotParticipant,
            "invite_request_sent" => Self::JoinRequestSent,
            "username_not_occupied" => Self::UsernameNotOccupied,
            "channel_invalid" => Self::ChannelInvalid,
            "channel_private" => Self::ChannelPrivate,
            "invite_hash_invalid" => Self::InviteHashInvalid,
            "invite_hash_expired" => Self::InviteHashExpired,
            "session_password_needed" => Self::PasswordRequired,
            "phone_code_invalid" => Self::InvalidCode,
            _ => Self::Other(message.into()),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Per-account capability surface of the session-authenticated protocol
/// client. One instance drives exactly one account.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn connect(&self) -> RemoteResult<()>;
    fn is_connected(&self) -> bool;
    async fn disconnect(&self) -> RemoteResult<()>;
    async fn send_verification_code(&self, phone: &Phone) -> RemoteResult<VerificationToken>;
    /// `PasswordRequired` and `InvalidCode` are the scripted continuations.
    async fn sign_in(
        &self,
        phone: &Phone,
        token: &VerificationToken,
        code: &str,
    ) -> RemoteResult<()>;
    async fn check_password(&self, password: &str) -> RemoteResult<()>;
    async fn export_credential(&self) -> RemoteResult<SessionCredential>;
    async fn join_by_invite(&self, hash: &str) -> RemoteResult<ChatInfo>;
    async fn join_by_identifier(&self, name: &str) -> RemoteResult<ChatInfo>;
    async fn leave(&self, chat: &ChatRef) -> RemoteResult<()>;
    async fn get_chat(&self, name: &str) -> RemoteResult<ChatInfo>;
    async fn send_message(&self, target: &str, text: &str) -> RemoteResult<()>;
}

/// Builds client handles: from a stored credential at startup, or fresh
/// (`None`) for onboarding.
pub trait RemoteClientFactory: Send + Sync {
    fn client_for(
        &self,
        phone: &Phone,
        credential: Option<&SessionCredential>,
    ) -> Arc<dyn RemoteClient>;
}

pub struct MissingRemoteClient;

#[async_trait]
impl RemoteClient for MissingRemoteClient {
    async fn connect(&self) -> RemoteResult<()> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn disconnect(&self) -> RemoteResult<()> {
        Ok(())
    }

    async fn send_verification_code(&self, _phone: &Phone) -> RemoteResult<VerificationToken> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn sign_in(
        &self,
        _phone: &Phone,
        _token: &VerificationToken,
        _code: &str,
    ) -> RemoteResult<()> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn check_password(&self, _password: &str) -> RemoteResult<()> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn export_credential(&self) -> RemoteResult<SessionCredential> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn join_by_invite(&self, _hash: &str) -> RemoteResult<ChatInfo> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn join_by_identifier(&self, _name: &str) -> RemoteResult<ChatInfo> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn leave(&self, _chat: &ChatRef) -> RemoteResult<()> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn get_chat(&self, _name: &str) -> RemoteResult<ChatInfo> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }

    async fn send_message(&self, _target: &str, _text: &str) -> RemoteResult<()> {
        Err(RemoteError::other("remote client backend is unavailable"))
    }
}

pub struct MissingRemoteClientFactory;

impl RemoteClientFactory for MissingRemoteClientFactory {
    fn client_for(
        &self,
        _phone: &Phone,
        _credential: Option<&SessionCredential>,
    ) -> Arc<dyn RemoteClient> {
        Arc::new(MissingRemoteClient)
    }
}
