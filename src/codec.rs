// Push protocol codec
//
// Inbound: binary WebSocket message -> PushFrame -> gzip payload -> Response
// batch -> typed sub-messages. Outbound: ack and heartbeat frames encoded with
// the same envelope schema.

use crate::error::PickerResult;
use crate::proto::{ChatMessage, Message, PushFrame, Response};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message as _;
use std::fmt;
use std::io::{Read, Write};

/// Payload type of data frames carrying a compressed batch
pub const PAYLOAD_TYPE_DATA: &str = "msg";
/// Payload type of ack frames
pub const PAYLOAD_TYPE_ACK: &str = "ack";
/// Payload type of heartbeat frames
pub const PAYLOAD_TYPE_HEARTBEAT: &str = "hb";

/// Sub-message types recognised in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Member,
    Gift,
    Social,
    Like,
    FanTicketUpdate,
    RoomUserSeq,
    CommonText,
    Other(String),
}

impl MessageKind {
    pub fn from_method(method: &str) -> Self {
        match method {
            "WebcastChatMessage" => Self::Chat,
            "WebcastMemberMessage" => Self::Member,
            "WebcastGiftMessage" => Self::Gift,
            "WebcastSocialMessage" => Self::Social,
            "WebcastLikeMessage" => Self::Like,
            "WebcastUpdateFanTicketMessage" => Self::FanTicketUpdate,
            "WebcastRoomUserSeqMessage" => Self::RoomUserSeq,
            "WebcastCommonTextMessage" => Self::CommonText,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_method(&self) -> &str {
        match self {
            Self::Chat => "WebcastChatMessage",
            Self::Member => "WebcastMemberMessage",
            Self::Gift => "WebcastGiftMessage",
            Self::Social => "WebcastSocialMessage",
            Self::Like => "WebcastLikeMessage",
            Self::FanTicketUpdate => "WebcastUpdateFanTicketMessage",
            Self::RoomUserSeq => "WebcastRoomUserSeqMessage",
            Self::CommonText => "WebcastCommonTextMessage",
            Self::Other(method) => method,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method())
    }
}

/// A decoded chat sub-message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub sender_id: u64,
    pub nickname: String,
    pub text: String,
    /// Sender-side unix timestamp in seconds
    pub event_time: i64,
}

/// Returns true for heartbeat and ack frames, which never carry a batch
pub fn is_control_frame(frame: &PushFrame) -> bool {
    frame.payload_type == PAYLOAD_TYPE_HEARTBEAT || frame.payload_type == PAYLOAD_TYPE_ACK
}

/// Decode the outer envelope of a binary WebSocket message
pub fn decode_frame(data: &[u8]) -> PickerResult<PushFrame> {
    Ok(PushFrame::decode(data)?)
}

/// Gunzip a frame payload
pub fn decompress(payload: &[u8]) -> PickerResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::with_capacity(payload.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Gzip bytes the way the push server compresses frame payloads
pub fn compress(data: &[u8]) -> PickerResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress and parse a frame payload into a batch
pub fn decode_batch(compressed: &[u8]) -> PickerResult<Response> {
    let raw = decompress(compressed)?;
    Ok(Response::decode(raw.as_slice())?)
}

/// Serialize and compress a batch into a frame payload
pub fn encode_batch(batch: &Response) -> PickerResult<Vec<u8>> {
    compress(&batch.encode_to_vec())
}

/// Ack frame echoing the inbound correlation id and extension token
pub fn encode_ack(log_id: u64, internal_ext: &str) -> Vec<u8> {
    PushFrame {
        log_id,
        payload_type: PAYLOAD_TYPE_ACK.to_string(),
        payload: internal_ext.as_bytes().to_vec(),
        ..Default::default()
    }
    .encode_to_vec()
}

/// Minimal keepalive frame
pub fn encode_heartbeat() -> Vec<u8> {
    PushFrame {
        payload_type: PAYLOAD_TYPE_HEARTBEAT.to_string(),
        ..Default::default()
    }
    .encode_to_vec()
}

/// Decode a sub-message if it is a chat message, `Ok(None)` for every other kind
pub fn decode_chat(message: &Message) -> PickerResult<Option<ChatEvent>> {
    if MessageKind::from_method(&message.method) != MessageKind::Chat {
        return Ok(None);
    }

    let chat = ChatMessage::decode(message.payload.as_slice())?;
    let (sender_id, nickname) = chat
        .user
        .map(|user| (user.short_id, user.nickname))
        .unwrap_or_default();

    Ok(Some(ChatEvent {
        sender_id,
        nickname,
        text: chat.content,
        event_time: i64::try_from(chat.event_time).unwrap_or(i64::MAX),
    }))
}

/// Decode every chat sub-message of a batch, in batch order.
///
/// A malformed chat payload yields an `Err` entry without affecting its siblings.
pub fn chat_events(batch: &Response) -> impl Iterator<Item = PickerResult<ChatEvent>> + '_ {
    batch
        .messages
        .iter()
        .filter_map(|message| decode_chat(message).transpose())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::proto::User;

    pub fn chat_message(sender_id: u64, text: &str, event_time: u64) -> Message {
        let chat = ChatMessage {
            user: Some(User {
                id: sender_id,
                short_id: sender_id,
                nickname: format!("user-{}", sender_id),
            }),
            content: text.to_string(),
            event_time,
        };
        Message {
            method: MessageKind::Chat.as_method().to_string(),
            payload: chat.encode_to_vec(),
            msg_id: 0,
        }
    }

    pub fn other_message(kind: MessageKind) -> Message {
        Message {
            method: kind.as_method().to_string(),
            payload: vec![0x08, 0x01],
            msg_id: 0,
        }
    }

    pub fn batch_payload(messages: Vec<Message>) -> Vec<u8> {
        encode_batch(&Response {
            messages,
            ..Default::default()
        })
        .unwrap()
    }
}
