//! 参与者身份：注册成员或房间内的临时访客。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::{GuestId, UserId};

/// 成员 / 访客两种 id 空间的显式联合。
///
/// 凡是需要携带“发送者”或“在线者”身份的地方都使用它，
/// 而不是把两种 id 混在一个字符串字段里。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ParticipantId {
    Member(UserId),
    Guest(GuestId),
}

impl ParticipantId {
    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest(_))
    }

    pub fn member_id(&self) -> Option<UserId> {
        match self {
            Self::Member(id) => Some(*id),
            Self::Guest(_) => None,
        }
    }

    pub fn guest_id(&self) -> Option<&GuestId> {
        match self {
            Self::Member(_) => None,
            Self::Guest(id) => Some(id),
        }
    }
}

/// 输出裸 id 字符串，用于事件负载中的 `id` / `userId` 字段。
impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(id) => write!(f, "{id}"),
            Self::Guest(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestProfile {
    pub guest_id: GuestId,
    pub display_name: String,
    pub avatar: Option<String>,
}

/// 一次连接 / 请求解析出的身份，连接存活期间不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    Member(MemberProfile),
    Guest(GuestProfile),
}

impl Principal {
    pub fn participant_id(&self) -> ParticipantId {
        match self {
            Self::Member(member) => ParticipantId::Member(member.user_id),
            Self::Guest(guest) => ParticipantId::Guest(guest.guest_id.clone()),
        }
    }

    /// 未经任何备注替换的基础名称。
    pub fn display_name(&self) -> &str {
        match self {
            Self::Member(member) => &member.username,
            Self::Guest(guest) => &guest.display_name,
        }
    }

    pub fn avatar(&self) -> Option<&str> {
        match self {
            Self::Member(member) => member.avatar.as_deref(),
            Self::Guest(guest) => guest.avatar.as_deref(),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest(_))
    }

    pub fn member_id(&self) -> Option<UserId> {
        match self {
            Self::Member(member) => Some(member.user_id),
            Self::Guest(_) => None,
        }
    }
}

impl From<MemberProfile> for Principal {
    fn from(value: MemberProfile) -> Self {
        Self::Member(value)
    }
}

impl From<GuestProfile> for Principal {
    fn from(value: GuestProfile) -> Self {
        Self::Guest(value)
    }
}
