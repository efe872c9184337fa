use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::principal::{ParticipantId, Principal};
use crate::value_objects::{MessageId, RoomId, Timestamp};

/// 单条文本消息允许的最大字符数。
pub const MAX_TEXT_LEN: usize = 4000;

/// 消息正文：文本与媒体引用至少存在其一。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageBody {
    pub text: Option<String>,
    /// 不透明的媒体引用（上传由外部服务负责）
    pub media: Option<String>,
}

impl MessageBody {
    /// 规范化并校验正文。空白文本视为缺失。
    pub fn new(text: Option<String>, media: Option<String>) -> DomainResult<Self> {
        let text = non_blank(text);
        let media = non_blank(media);

        if text.is_none() && media.is_none() {
            return Err(DomainError::invalid_argument(
                "body",
                "message must contain text or media",
            ));
        }
        if let Some(text) = &text {
            if text.chars().count() > MAX_TEXT_LEN {
                return Err(DomainError::invalid_argument(
                    "text",
                    format!("cannot exceed {MAX_TEXT_LEN} characters"),
                ));
            }
        }

        Ok(Self { text, media })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// 已持久化的消息，写入后不可变。
///
/// `sender_name` 是发送时的基础名称快照，永远不会写入备注。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: ParticipantId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub body: MessageBody,
    pub created_at: Timestamp,
}

impl Message {
    pub fn compose(
        id: MessageId,
        room_id: RoomId,
        sender: &Principal,
        body: MessageBody,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender: sender.participant_id(),
            sender_name: sender.display_name().to_owned(),
            sender_avatar: sender.avatar().map(str::to_owned),
            body,
            created_at,
        }
    }

    pub fn is_guest_sender(&self) -> bool {
        self.sender.is_guest()
    }
}
