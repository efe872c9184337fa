//! 推送给客户端的事件负载。
//!
//! 线上格式为 `{"event": <name>, "data": <payload>}`，字段名为 camelCase。

use domain::{Message, MessageId, Principal, RoomId, Timestamp};
use serde::{Deserialize, Serialize};

/// 某个接收者眼中的参与者。
///
/// 个性化视图中 `username` 是备注，`original_username` 保留真实名称；
/// 通用视图没有 `original_username` 字段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_username: Option<String>,
    pub pic: Option<String>,
    pub is_guest: bool,
}

impl ParticipantView {
    pub fn from_principal(principal: &Principal) -> Self {
        Self {
            id: principal.participant_id().to_string(),
            username: principal.display_name().to_owned(),
            original_username: None,
            pic: principal.avatar().map(str::to_owned),
            is_guest: principal.is_guest(),
        }
    }

    pub fn sender_of(message: &Message) -> Self {
        Self {
            id: message.sender.to_string(),
            username: message.sender_name.clone(),
            original_username: None,
            pic: message.sender_avatar.clone(),
            is_guest: message.is_guest_sender(),
        }
    }

    pub fn aliased(self, alias: &str) -> Self {
        Self {
            original_username: Some(self.username),
            username: alias.to_owned(),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub room_id: RoomId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    pub sender: ParticipantView,
}

impl MessageView {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id,
            text: message.body.text.clone(),
            media: message.body.media.clone(),
            room_id: message.room_id,
            created_at: message.created_at,
            sender: ParticipantView::sender_of(message),
        }
    }

    pub fn personalized(&self, alias: &str) -> Self {
        Self {
            sender: self.sender.clone().aliased(alias),
            ..self.clone()
        }
    }
}

/// 服务端下发的所有事件。
///
/// 前四种经由频道广播；其余是对单个连接请求的直接回复。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "presence:online")]
    PresenceOnline { room_id: RoomId, user: ParticipantView },
    #[serde(rename = "presence:offline")]
    PresenceOffline {
        room_id: RoomId,
        user_id: String,
        is_guest: bool,
    },
    #[serde(rename = "presence:typing")]
    Typing {
        room_id: RoomId,
        user_id: String,
        username: String,
        is_typing: bool,
    },
    #[serde(rename = "message:new")]
    MessageNew { message: MessageView },

    #[serde(rename = "room:joined")]
    RoomJoined { room_id: RoomId, already_joined: bool },
    #[serde(rename = "room:left")]
    RoomLeft { room_id: RoomId },
    #[serde(rename = "message:sent")]
    MessageSent { message: MessageView },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PresenceOnline { .. } => "presence:online",
            Self::PresenceOffline { .. } => "presence:offline",
            Self::Typing { .. } => "presence:typing",
            Self::MessageNew { .. } => "message:new",
            Self::RoomJoined { .. } => "room:joined",
            Self::RoomLeft { .. } => "room:left",
            Self::MessageSent { .. } => "message:sent",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
