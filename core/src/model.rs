/// Identities, channels and messages shared by every session component
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i64;
pub type ChatId = i64;

/// Reserved id of the shared broadcast channel
pub const GROUP_CHAT_ID: ChatId = 0;

/// Selector title of the group channel
pub const GROUP_CHANNEL_TITLE: &str = "MAIN";

/// Selector title of the viewer's self-notes channel
pub const NOTES_CHANNEL_TITLE: &str = "NOTES";

/// Full identity as known to its owner after login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            password_hash: None,
        }
    }

    /// The part of the identity other users get to see
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

/// Identity as seen by others: id and username only
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub id: UserId,
    pub username: String,
}

impl PublicIdentity {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

impl fmt::Display for PublicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.username, self.id)
    }
}

/// A conversation the viewer can open. The id alone determines its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChatId,
    pub title: String,
}

impl Channel {
    pub fn new(id: ChatId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

impl From<&PublicIdentity> for Channel {
    fn from(identity: &PublicIdentity) -> Self {
        Channel::new(identity.id, identity.username.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Group,
    /// Includes notes (author == chat == viewer)
    Private,
}

/// Chat message as stored and relayed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub author: PublicIdentity,
    pub chat_id: ChatId,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(author: PublicIdentity, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            author,
            chat_id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> ChatKind {
        if self.chat_id == GROUP_CHAT_ID {
            ChatKind::Group
        } else {
            ChatKind::Private
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_uses_chat_id_only() {
        let author = PublicIdentity::new(7, "ann");
        assert_eq!(Message::new(author.clone(), GROUP_CHAT_ID, "hi").kind(), ChatKind::Group);
        assert_eq!(Message::new(author.clone(), 7, "memo").kind(), ChatKind::Private);
        assert_eq!(Message::new(author, 9, "psst").kind(), ChatKind::Private);
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::json!({
            "author": { "id": 3, "username": "bob" },
            "chatId": 0,
            "text": "hello",
            "timestamp": "2024-05-01T12:00:00Z"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.author.id, 3);
        assert_eq!(msg.chat_id, 0);
        assert_eq!(msg.text, "hello");
    }

    #[test]
    fn test_user_public_drops_credentials() {
        let user = User {
            id: 5,
            username: "eve".to_string(),
            password_hash: Some("abc".to_string()),
        };
        assert_eq!(user.public(), PublicIdentity::new(5, "eve"));
    }
}
