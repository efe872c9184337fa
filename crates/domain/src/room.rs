//! 房间文档及其不变式。
//!
//! 房间分两种：没有名称的一对一“直聊”房间，以及带名称、由管理员治理的群聊房间。
//! 无论哪种，`成员数 + 访客数 <= member_limit` 在任何一次成功写入之后都成立。
//! 这里只提供纯数据上的校验与变更，持久化由应用层的房间存储适配器负责。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{GuestId, PasswordHash, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
}

/// 房间内的访客条目，访客只属于这一个房间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub guest_id: GuestId,
    pub display_name: String,
    pub avatar: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: Timestamp,
}

impl Guest {
    pub const NAME_MIN: usize = 3;
    pub const NAME_MAX: usize = 30;

    /// 以新生成的访客 id 创建条目；访客显示名允许重复。
    pub fn admit(
        display_name: impl Into<String>,
        avatar: Option<String>,
        joined_at: Timestamp,
    ) -> DomainResult<Self> {
        let display_name = display_name.into().trim().to_owned();
        let len = display_name.chars().count();
        if len < Self::NAME_MIN {
            return Err(DomainError::invalid_argument(
                "display_name",
                format!("must be at least {} characters", Self::NAME_MIN),
            ));
        }
        if len > Self::NAME_MAX {
            return Err(DomainError::invalid_argument(
                "display_name",
                format!("cannot exceed {} characters", Self::NAME_MAX),
            ));
        }
        Ok(Self {
            guest_id: GuestId::generate(),
            display_name,
            avatar: normalize_avatar(avatar)?,
            joined_at,
        })
    }
}

/// 创建房间的请求形状。`name` 是否存在决定了房间类型。
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub name: Option<String>,
    pub member_ids: Vec<UserId>,
    pub admin_ids: Vec<UserId>,
    pub member_limit: Option<u32>,
    pub avatar: Option<String>,
    pub is_temporary: Option<bool>,
}

/// 管理员对房间的局部更新。
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub member_limit: Option<u32>,
    /// 空字符串表示清除头像
    pub avatar: Option<String>,
    pub is_temporary: Option<bool>,
    /// `Some(None)` 表示取消密码
    pub password: Option<Option<PasswordHash>>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.member_limit.is_none()
            && self.avatar.is_none()
            && self.is_temporary.is_none()
            && self.password.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: Option<String>,
    pub member_ids: Vec<UserId>,
    pub admin_ids: Vec<UserId>,
    pub guests: Vec<Guest>,
    pub member_limit: u32,
    pub password: Option<PasswordHash>,
    pub avatar: Option<String>,
    pub is_temporary: bool,
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// 文档版本号，每次成功写入递增
    pub version: u64,
}

impl Room {
    pub const DIRECT_MEMBER_LIMIT: u32 = 2;
    pub const MIN_MEMBER_LIMIT: u32 = 2;
    pub const NAME_MIN: usize = 3;
    pub const NAME_MAX: usize = 50;
    pub const PASSWORD_MIN: usize = 6;
    pub const PASSWORD_MAX: usize = 100;

    pub fn create(
        id: RoomId,
        creator: UserId,
        draft: NewRoom,
        password: Option<PasswordHash>,
        default_group_limit: u32,
        now: Timestamp,
    ) -> DomainResult<Self> {
        let mut member_ids = dedup(draft.member_ids);
        if !member_ids.contains(&creator) {
            member_ids.push(creator);
        }
        let avatar = normalize_avatar(draft.avatar)?;
        let name = draft
            .name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty());

        let Some(name) = name else {
            if member_ids.len() > Self::DIRECT_MEMBER_LIMIT as usize {
                return Err(DomainError::invalid_argument(
                    "member_ids",
                    "direct room can only have two members",
                ));
            }
            if password.is_some() {
                return Err(DomainError::invalid_argument(
                    "password",
                    "direct rooms cannot be password protected",
                ));
            }
            return Ok(Self {
                id,
                name: None,
                member_ids,
                admin_ids: Vec::new(),
                guests: Vec::new(),
                member_limit: Self::DIRECT_MEMBER_LIMIT,
                password: None,
                avatar,
                is_temporary: true,
                created_by: creator,
                created_at: now,
                updated_at: now,
                version: 0,
            });
        };

        let name = validate_name(name)?;
        let member_limit = draft.member_limit.unwrap_or(default_group_limit);
        validate_limit(member_limit)?;

        let mut admin_ids = dedup(draft.admin_ids);
        if !admin_ids.contains(&creator) {
            admin_ids.push(creator);
        }
        if admin_ids.iter().any(|admin| !member_ids.contains(admin)) {
            return Err(DomainError::invalid_argument(
                "admin_ids",
                "admins must be members of the room",
            ));
        }
        if member_ids.len() > member_limit as usize {
            return Err(DomainError::invalid_argument(
                "member_ids",
                "initial members exceed the member limit",
            ));
        }

        Ok(Self {
            id,
            name: Some(name),
            member_ids,
            admin_ids,
            guests: Vec::new(),
            member_limit,
            password,
            avatar,
            is_temporary: draft.is_temporary.unwrap_or(true),
            created_by: creator,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// 校验明文房间密码的长度（哈希之前）。
    pub fn validate_password(plaintext: &str) -> DomainResult<()> {
        let len = plaintext.chars().count();
        if len < Self::PASSWORD_MIN {
            return Err(DomainError::invalid_argument(
                "password",
                format!("must be at least {} characters", Self::PASSWORD_MIN),
            ));
        }
        if len > Self::PASSWORD_MAX {
            return Err(DomainError::invalid_argument(
                "password",
                format!("cannot exceed {} characters", Self::PASSWORD_MAX),
            ));
        }
        Ok(())
    }

    pub fn kind(&self) -> RoomKind {
        if self.name.is_some() {
            RoomKind::Group
        } else {
            RoomKind::Direct
        }
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        self.member_ids.contains(&user_id)
    }

    /// 直聊房间没有管理员列表，创建者即唯一管理员。
    pub fn has_admin(&self, user_id: UserId) -> bool {
        match self.kind() {
            RoomKind::Group => self.admin_ids.contains(&user_id),
            RoomKind::Direct => self.created_by == user_id && self.has_member(user_id),
        }
    }

    pub fn has_guest(&self, guest_id: &GuestId) -> bool {
        self.guests.iter().any(|guest| &guest.guest_id == guest_id)
    }

    pub fn guest(&self, guest_id: &GuestId) -> Option<&Guest> {
        self.guests.iter().find(|guest| &guest.guest_id == guest_id)
    }

    pub fn occupancy(&self) -> usize {
        self.member_ids.len() + self.guests.len()
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.member_limit as usize
    }

    pub fn requires_password(&self) -> bool {
        self.password.is_some()
    }

    /// 成员准入检查，顺序固定：容量 -> 重复成员。
    pub fn ensure_can_admit_member(&self, user_id: UserId) -> DomainResult<()> {
        if self.is_full() {
            return Err(DomainError::RoomFull);
        }
        if self.has_member(user_id) {
            return Err(DomainError::AlreadyMember);
        }
        Ok(())
    }

    pub fn ensure_can_admit_guest(&self) -> DomainResult<()> {
        if self.is_full() {
            return Err(DomainError::RoomFull);
        }
        Ok(())
    }

    pub fn add_member(&mut self, user_id: UserId, now: Timestamp) -> DomainResult<()> {
        self.ensure_can_admit_member(user_id)?;
        self.member_ids.push(user_id);
        self.updated_at = now;
        Ok(())
    }

    pub fn add_guest(&mut self, guest: Guest, now: Timestamp) -> DomainResult<()> {
        self.ensure_can_admit_guest()?;
        self.guests.push(guest);
        self.updated_at = now;
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: RoomPatch, now: Timestamp) -> DomainResult<()> {
        if patch.is_empty() {
            return Err(DomainError::invalid_argument(
                "patch",
                "at least one field is required",
            ));
        }
        if self.kind() == RoomKind::Direct
            && (patch.name.is_some() || patch.member_limit.is_some() || patch.password.is_some())
        {
            return Err(DomainError::invalid_argument(
                "patch",
                "direct rooms only accept avatar and is_temporary changes",
            ));
        }

        if let Some(name) = patch.name {
            self.name = Some(validate_name(name)?);
        }
        if let Some(limit) = patch.member_limit {
            validate_limit(limit)?;
            if (limit as usize) < self.occupancy() {
                return Err(DomainError::invalid_argument(
                    "member_limit",
                    "cannot be lower than the current number of participants",
                ));
            }
            self.member_limit = limit;
        }
        if let Some(avatar) = patch.avatar {
            self.avatar = normalize_avatar(Some(avatar))?;
        }
        if let Some(is_temporary) = patch.is_temporary {
            self.is_temporary = is_temporary;
        }
        if let Some(password) = patch.password {
            self.password = password;
        }
        self.updated_at = now;
        Ok(())
    }
}

fn dedup(ids: Vec<UserId>) -> Vec<UserId> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

fn validate_name(name: String) -> DomainResult<String> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len < Room::NAME_MIN {
        return Err(DomainError::invalid_argument(
            "name",
            format!("must be at least {} characters", Room::NAME_MIN),
        ));
    }
    if len > Room::NAME_MAX {
        return Err(DomainError::invalid_argument(
            "name",
            format!("cannot exceed {} characters", Room::NAME_MAX),
        ));
    }
    Ok(trimmed.to_owned())
}

fn validate_limit(limit: u32) -> DomainResult<()> {
    if limit < Room::MIN_MEMBER_LIMIT {
        return Err(DomainError::invalid_argument(
            "member_limit",
            format!("must be at least {}", Room::MIN_MEMBER_LIMIT),
        ));
    }
    Ok(())
}

// 头像只接受 http(s) 链接或 data:image/ 内联图片
fn normalize_avatar(avatar: Option<String>) -> DomainResult<Option<String>> {
    let Some(avatar) = avatar.map(|value| value.trim().to_owned()) else {
        return Ok(None);
    };
    if avatar.is_empty() {
        return Ok(None);
    }
    if !(avatar.starts_with("http") || avatar.starts_with("data:image/")) {
        return Err(DomainError::invalid_argument(
            "avatar",
            "must be an image URL or data URL",
        ));
    }
    Ok(Some(avatar))
}
