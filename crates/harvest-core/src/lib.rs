#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum message content length, in Unicode scalar values.
pub const MAX_MESSAGE_CONTENT_CHARS: usize = 2000;

const MAX_USER_ID_CHARS: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("buyer id is invalid")]
    InvalidBuyerId,
    #[error("seller id is invalid")]
    InvalidSellerId,
    #[error("chat room id is invalid")]
    InvalidChatRoomId,
    #[error("message id is invalid")]
    InvalidMessageId,
    #[error("message content exceeds {MAX_MESSAGE_CONTENT_CHARS} characters")]
    MessageContentTooLong,
}

/// Opaque authenticated-caller reference.
///
/// The value comes from a verified token's subject claim or, outside
/// production, from a caller-supplied development identity; it is kept
/// verbatim rather than forced into any id format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_user_id(&value)?;
        Ok(Self(value))
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuyerId(Uuid);

impl BuyerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BuyerId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for BuyerId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Uuid::parse_str(&value).map_err(|_| DomainError::InvalidBuyerId)?;
        Ok(Self(parsed))
    }
}

impl From<BuyerId> for String {
    fn from(value: BuyerId) -> Self {
        value.0.to_string()
    }
}

impl core::fmt::Display for BuyerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SellerId(Uuid);

impl SellerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SellerId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for SellerId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Uuid::parse_str(&value).map_err(|_| DomainError::InvalidSellerId)?;
        Ok(Self(parsed))
    }
}

impl From<SellerId> for String {
    fn from(value: SellerId) -> Self {
        value.0.to_string()
    }
}

impl core::fmt::Display for SellerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the unique conversation between one buyer and one seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChatRoomId(Uuid);

impl ChatRoomId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatRoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for ChatRoomId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Uuid::parse_str(&value).map_err(|_| DomainError::InvalidChatRoomId)?;
        Ok(Self(parsed))
    }
}

impl From<ChatRoomId> for String {
    fn from(value: ChatRoomId) -> Self {
        value.0.to_string()
    }
}

impl core::fmt::Display for ChatRoomId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(Uuid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for MessageId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Uuid::parse_str(&value).map_err(|_| DomainError::InvalidMessageId)?;
        Ok(Self(parsed))
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        value.0.to_string()
    }
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_user_id(value: &str) -> Result<(), DomainError> {
    if value.is_empty() || value.chars().count() > MAX_USER_ID_CHARS {
        return Err(DomainError::InvalidUserId);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
    {
        return Ok(());
    }

    Err(DomainError::InvalidUserId)
}

/// Enforce the message content length cap.
///
/// Emptiness is not checked here: whether empty content is acceptable
/// depends on whether an image accompanies the message, which only the
/// message pipeline knows.
///
/// # Errors
/// Returns [`DomainError::MessageContentTooLong`] past the cap.
pub fn validate_message_content(content: &str) -> Result<(), DomainError> {
    if content.chars().count() > MAX_MESSAGE_CONTENT_CHARS {
        return Err(DomainError::MessageContentTooLong);
    }
    Ok(())
}
