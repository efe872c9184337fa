use domain::{Guest, Room, RoomId, RoomKind, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// 访客在房间资料中的公开形式，不含访客 id（它本身就是访客凭据）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestView {
    pub display_name: String,
    pub avatar: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

impl From<&Guest> for GuestView {
    fn from(guest: &Guest) -> Self {
        Self {
            display_name: guest.display_name.clone(),
            avatar: guest.avatar.clone(),
            joined_at: guest.joined_at,
        }
    }
}

/// 房间公开资料，密码哈希只以 `hasPassword` 体现
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomId,
    pub kind: RoomKind,
    pub name: Option<String>,
    pub member_ids: Vec<UserId>,
    pub admin_ids: Vec<UserId>,
    pub guests: Vec<GuestView>,
    pub member_limit: u32,
    pub occupancy: usize,
    pub has_password: bool,
    pub avatar: Option<String>,
    pub is_temporary: bool,
    pub created_by: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            kind: room.kind(),
            name: room.name.clone(),
            member_ids: room.member_ids.clone(),
            admin_ids: room.admin_ids.clone(),
            guests: room.guests.iter().map(GuestView::from).collect(),
            member_limit: room.member_limit,
            occupancy: room.occupancy(),
            has_password: room.requires_password(),
            avatar: room.avatar.clone(),
            is_temporary: room.is_temporary,
            created_by: room.created_by,
            created_at: room.created_at,
            updated_at: room.updated_at,
        }
    }
}

/// 访客加入成功后返回的凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestJoinResponse {
    pub guest_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub room: RoomView,
}
