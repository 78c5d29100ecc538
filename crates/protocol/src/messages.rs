//! Chat message envelope.
//!
//! Every chat record is a compact JSON object carrying the sender's user
//! metadata and the message text. Serialization is field-tagged and always
//! single-line: JSON string escaping turns any newline inside the text into
//! `\n`, so the encoded envelope never contains a raw frame delimiter.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Sender metadata attached to every message.
///
/// None of these fields are authenticated. `password_hash` is carried
/// through untouched and never checked.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// Display name rendered next to each message.
    pub name: String,
    /// Opaque user identifier.
    pub id: String,
    /// Opaque pass-through value.
    pub password_hash: String,
}

impl User {
    /// Create a user with the given display name, id and password hash.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            password_hash: password_hash.into(),
        }
    }
}

/// One chat message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// The sending user.
    pub user: User,
    /// Free-form message text, possibly empty.
    pub message: String,
}

impl ChatMessage {
    /// Create a new message from `user` with the given text.
    pub fn new(user: User, message: impl Into<String>) -> Self {
        Self {
            user,
            message: message.into(),
        }
    }

    /// Returns true if this message should not be displayed.
    ///
    /// A single trailing line terminator (`"\r\n"` or `"\n"`) is removed
    /// first; the message is blank if what remains is empty or a bare
    /// `"\n"`. Whitespace-only text is not blank.
    pub fn is_blank(&self) -> bool {
        let text = &self.message;
        let text = text
            .strip_suffix("\r\n")
            .or_else(|| text.strip_suffix('\n'))
            .unwrap_or(text);
        text.is_empty() || text == "\n"
    }

    /// Format the message for the terminal as `name : message`.
    pub fn display_line(&self) -> String {
        format!("{} : {}", self.user.name, self.message)
    }

    /// Serialize to compact single-line JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON, ignoring surrounding whitespace.
    ///
    /// Unicode whitespace is trimmed when the record is valid UTF-8;
    /// otherwise only ASCII whitespace is, and parsing reports the bad bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let trimmed = match std::str::from_utf8(bytes) {
            Ok(text) => text.trim().as_bytes(),
            Err(_) => bytes.trim_ascii(),
        };
        if trimmed.is_empty() {
            return Err(ProtocolError::MalformedEnvelope(
                "empty record".to_string(),
            ));
        }
        Ok(serde_json::from_slice(trimmed)?)
    }
}

/// Build an envelope for `text` sent by `user` and serialize it.
pub fn encode(text: &str, user: &User) -> Result<Vec<u8>> {
    ChatMessage::new(user.clone(), text).to_json()
}

/// Parse one serialized envelope.
///
/// Fails with [`ProtocolError::MalformedEnvelope`] for anything that is not a
/// complete JSON object.
pub fn decode(bytes: &[u8]) -> Result<ChatMessage> {
    ChatMessage::from_json(bytes)
}
