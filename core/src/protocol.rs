/// Wire protocol: event names, payload shapes and frame encoding
use crate::error::ChatError;
use crate::model::{ChatId, PublicIdentity, User};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest frame payload accepted from the server (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Inbound event names
pub mod inbound {
    pub const LOGIN_FAILED: &str = "/failed-login";
    // Spelling matches what the server sends.
    pub const REGISTER_FAILED: &str = "/failed-registeration";
    pub const LOGIN_SUCCESS: &str = "/login";
    pub const MESSAGE: &str = "/message";
    pub const MESSAGES_BATCH: &str = "/get-messages";
    pub const CHANNELS_LIST: &str = "/get-channels";
}

/// Outbound event names
pub mod outbound {
    pub const LOGIN: &str = "/login";
    pub const REGISTER: &str = "/register";
    pub const MESSAGE: &str = "/message";
    pub const GET_MESSAGES: &str = "/get-messages";
    pub const GET_CHANNELS: &str = "/get-channels";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub username: String,
    pub password_hash: String,
}

/// Server-supplied reason for a rejected login or registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub author: PublicIdentity,
    pub chat_id: ChatId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRequest {
    pub chat_id: ChatId,
    pub requesting_user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsRequest {
    pub requesting_user: User,
}

/// Events the client sends to the server
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Login(LoginData),
    Register(LoginData),
    Message(OutgoingMessage),
    GetMessages(MessagesRequest),
    GetChannels(ChannelsRequest),
}

impl Outbound {
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::Login(_) => outbound::LOGIN,
            Outbound::Register(_) => outbound::REGISTER,
            Outbound::Message(_) => outbound::MESSAGE,
            Outbound::GetMessages(_) => outbound::GET_MESSAGES,
            Outbound::GetChannels(_) => outbound::GET_CHANNELS,
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Outbound::Login(data) | Outbound::Register(data) => serde_json::to_value(data),
            Outbound::Message(msg) => serde_json::to_value(msg),
            Outbound::GetMessages(req) => serde_json::to_value(req),
            Outbound::GetChannels(req) => serde_json::to_value(req),
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        Ok(Envelope {
            event: self.name().to_string(),
            data: self.payload()?,
        })
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outbound({})", self.name())
    }
}

/// Named event as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Protocol frame: 4-byte big-endian length prefix, then the JSON envelope
#[derive(Debug)]
pub struct Frame {
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: envelope.to_bytes()?,
        })
    }

    /// Serialize frame to bytes (length prefix + payload)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.payload.len());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Payload length announced by a prefix, bounded by [`MAX_FRAME_LEN`]
    pub fn payload_len(prefix: [u8; 4]) -> crate::error::Result<usize> {
        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_FRAME_LEN {
            return Err(ChatError::Protocol(format!(
                "Frame of {} bytes exceeds limit of {}",
                length, MAX_FRAME_LEN
            )));
        }
        Ok(length)
    }

    pub fn envelope(&self) -> Result<Envelope, serde_json::Error> {
        Envelope::from_bytes(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_field_names() {
        let msg = Outbound::Message(OutgoingMessage {
            author: PublicIdentity::new(7, "ann"),
            chat_id: 9,
            text: "hey".to_string(),
        });
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.event, "/message");
        assert_eq!(env.data["chatId"], 9);
        assert_eq!(env.data["author"]["username"], "ann");

        let login = Outbound::Login(LoginData {
            username: "ann".to_string(),
            password_hash: "00ff".to_string(),
        });
        assert_eq!(login.payload().unwrap()["passwordHash"], "00ff");

        let req = Outbound::GetChannels(ChannelsRequest {
            requesting_user: User::new(7, "ann"),
        });
        assert_eq!(req.payload().unwrap()["requestingUser"]["id"], 7);
    }

    #[test]
    fn test_frame_prefix_and_limit() {
        let env = Envelope::new("/message", serde_json::json!({ "text": "x" }));
        let bytes = Frame::from_envelope(&env).unwrap().to_bytes();
        let prefix = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let length = Frame::payload_len(prefix).unwrap();
        assert_eq!(length, bytes.len() - 4);

        let frame = Frame {
            payload: bytes[4..4 + length].to_vec(),
        };
        assert_eq!(frame.envelope().unwrap(), env);

        let oversized = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        assert!(matches!(Frame::payload_len(oversized), Err(ChatError::Protocol(_))));
        assert!(Frame::payload_len((MAX_FRAME_LEN as u32).to_be_bytes()).is_ok());
    }
}
