use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{ConversationId, MessageId, UserId};
use super::timestamp::Timestamp;

/// Kind of content carried by a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// Whether a stored message was authored by the session user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageFormatError {
    #[error("text message is missing `message_text`")]
    MissingText,
    #[error("image message is missing `data`")]
    MissingImageData,
    #[error("image data must be a base64 data URL")]
    InvalidImageData,
}

/// Self-contained image encoding (`data:<mime>;base64,<payload>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    data_url: String,
}

impl ImageData {
    /// Encodes raw image bytes, sniffing the MIME type from the magic number.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mime = sniff_mime(bytes);
        Self {
            data_url: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
        }
    }

    /// Validates an existing data URL.
    ///
    /// # Errors
    /// Returns [`MessageFormatError::InvalidImageData`] when the value is not a base64 data URL.
    pub fn parse(data_url: impl Into<String>) -> Result<Self, MessageFormatError> {
        let data_url = data_url.into();
        let valid = data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .is_some();
        if valid {
            Ok(Self { data_url })
        } else {
            Err(MessageFormatError::InvalidImageData)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data_url
    }

    #[must_use]
    pub fn mime(&self) -> &str {
        self.data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map_or("application/octet-stream", |(mime, _)| mime)
    }

    /// Decodes the embedded payload back into raw bytes.
    ///
    /// # Errors
    /// Returns the base64 decode error for a corrupted payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let payload = self
            .data_url
            .split_once(";base64,")
            .map_or("", |(_, payload)| payload);
        STANDARD.decode(payload)
    }

    /// Size of the decoded payload, estimated from the base64 length.
    #[must_use]
    pub fn approx_decoded_len(&self) -> usize {
        let payload = self
            .data_url
            .split_once(";base64,")
            .map_or("", |(_, payload)| payload);
        let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
        (payload.len() / 4 * 3).saturating_sub(padding)
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Content of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Image(ImageData),
}

impl MessageBody {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Image(_) => MessageKind::Image,
        }
    }
}

/// A message as exchanged with the history endpoint and the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: MessageBody,
    pub timestamp: Option<Timestamp>,
}

impl Message {
    #[must_use]
    pub fn text(
        message_id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            conversation_id,
            sender_id,
            body: MessageBody::Text(text.into()),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn image(
        message_id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        image: ImageData,
    ) -> Self {
        Self {
            message_id,
            conversation_id,
            sender_id,
            body: MessageBody::Image(image),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    #[must_use]
    pub fn text_payload(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Image(_) => None,
        }
    }

    #[must_use]
    pub fn direction(&self, me: UserId) -> Direction {
        if self.sender_id == me {
            Direction::Sent
        } else {
            Direction::Received
        }
    }

    /// One-line rendering used by terminal front ends.
    #[must_use]
    pub fn preview(&self) -> String {
        match &self.body {
            MessageBody::Text(text) => text.clone(),
            MessageBody::Image(image) => {
                let kib = image.approx_decoded_len().div_ceil(1024);
                format!("[image {} {kib} KiB]", image.mime())
            }
        }
    }
}

/// Flat JSON shape shared with the server and the other clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    message_id: MessageId,
    conversation_id: ConversationId,
    sender_id: UserId,
    #[serde(rename = "type", default)]
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, alias = "sent_at", skip_serializing_if = "Option::is_none")]
    timestamp: Option<Timestamp>,
}

impl TryFrom<WireMessage> for Message {
    type Error = MessageFormatError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let body = match wire.kind {
            MessageKind::Text => {
                MessageBody::Text(wire.message_text.ok_or(MessageFormatError::MissingText)?)
            }
            MessageKind::Image => MessageBody::Image(ImageData::parse(
                wire.data.ok_or(MessageFormatError::MissingImageData)?,
            )?),
        };

        Ok(Self {
            message_id: wire.message_id,
            conversation_id: wire.conversation_id,
            sender_id: wire.sender_id,
            body,
            timestamp: wire.timestamp,
        })
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let kind = message.kind();
        let (message_text, data) = match message.body {
            MessageBody::Text(text) => (Some(text), None),
            MessageBody::Image(image) => (None, Some(image.data_url)),
        };

        Self {
            message_id: message.message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind,
            message_text,
            data,
            timestamp: message.timestamp,
        }
    }
}
