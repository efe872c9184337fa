//! 内存文档存储，用于开发环境与测试。
//!
//! 房间写入在同一把写锁内完成版本比较与替换，语义与数据库适配器一致。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{FriendAlias, GuestId, Message, MessageId, RepositoryError, Room, RoomId, UserId};
use tokio::sync::RwLock;

use crate::repository::{AliasRepository, MessageRepository, RoomRepository};

#[derive(Default)]
pub struct InMemoryRoomRepository {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl InMemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn insert(&self, room: Room) -> Result<Room, RepositoryError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict);
        }
        rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        Ok(self.rooms.read().await.get(&id).cloned())
    }

    async fn update(&self, mut room: Room, expected_version: u64) -> Result<Room, RepositoryError> {
        let mut rooms = self.rooms.write().await;
        let stored = rooms.get_mut(&room.id).ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict);
        }
        room.version = expected_version + 1;
        *stored = room.clone();
        Ok(room)
    }

    async fn find_by_guest(&self, guest_id: &GuestId) -> Result<Option<Room>, RepositoryError> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .find(|room| room.has_guest(guest_id))
            .cloned())
    }

    async fn find_by_member(&self, user_id: UserId) -> Result<Vec<Room>, RepositoryError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .read()
            .await
            .values()
            .filter(|room| room.has_member(user_id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rooms)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Room>, RepositoryError> {
        let query = query.trim().to_lowercase();
        let rooms = self.rooms.read().await;
        let mut scored: Vec<(usize, &Room)> = rooms
            .values()
            .filter_map(|room| {
                let name = room.name.as_deref()?;
                fuzzy_score(&name.to_lowercase(), &query).map(|score| (score, room))
            })
            .collect();
        scored.sort_by(|(a, ra), (b, rb)| a.cmp(b).then_with(|| ra.name.cmp(&rb.name)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, room)| room.clone())
            .collect())
    }
}

/// 0 表示子串命中；否则取名称中各词与查询的最小编辑距离，超过 2 视为不匹配。
fn fuzzy_score(name: &str, query: &str) -> Option<usize> {
    if query.is_empty() {
        return None;
    }
    if name.contains(query) {
        return Some(0);
    }
    name.split_whitespace()
        .map(|word| edit_distance(word, query))
        .min()
        .filter(|distance| *distance <= 2)
        .map(|distance| distance + 1)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    // 每个房间按写入顺序保存
    messages: RwLock<HashMap<RoomId, Vec<Message>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: Message) -> Result<Message, RepositoryError> {
        self.messages
            .write()
            .await
            .entry(message.room_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self
            .messages
            .read()
            .await
            .values()
            .flatten()
            .find(|message| message.id == id)
            .cloned())
    }

    async fn list_by_room(
        &self,
        room_id: RoomId,
        limit: usize,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let Some(history) = messages.get(&room_id) else {
            return Ok(Vec::new());
        };
        let end = match before {
            Some(before) => match history.iter().position(|message| message.id == before) {
                Some(index) => index,
                None => return Ok(Vec::new()),
            },
            None => history.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(history[start..end].to_vec())
    }
}

#[derive(Default)]
pub struct InMemoryAliasRepository {
    aliases: RwLock<Vec<FriendAlias>>,
}

impl InMemoryAliasRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或覆盖一条备注（外部资料服务的写入入口）
    pub async fn set_alias(&self, owner: UserId, target: UserId, alias: impl Into<String>) {
        let alias = alias.into();
        let mut aliases = self.aliases.write().await;
        match aliases
            .iter_mut()
            .find(|record| record.owner_id == owner && record.target_user_id == target)
        {
            Some(record) => record.alias = alias,
            None => aliases.push(FriendAlias {
                owner_id: owner,
                target_user_id: target,
                alias,
            }),
        }
    }

    pub async fn remove_alias(&self, owner: UserId, target: UserId) {
        self.aliases
            .write()
            .await
            .retain(|record| !(record.owner_id == owner && record.target_user_id == target));
    }
}

#[async_trait]
impl AliasRepository for InMemoryAliasRepository {
    async fn find_by_owner(
        &self,
        owner: UserId,
        targets: &[UserId],
    ) -> Result<Vec<FriendAlias>, RepositoryError> {
        Ok(self
            .aliases
            .read()
            .await
            .iter()
            .filter(|record| record.owner_id == owner && targets.contains(&record.target_user_id))
            .cloned()
            .collect())
    }

    async fn find_by_target(
        &self,
        target: UserId,
        owners: &[UserId],
    ) -> Result<Vec<FriendAlias>, RepositoryError> {
        Ok(self
            .aliases
            .read()
            .await
            .iter()
            .filter(|record| record.target_user_id == target && owners.contains(&record.owner_id))
            .cloned()
            .collect())
    }
}
