//! 文档存储的协作者接口。
//!
//! 每个房间写入都是单文档的读-改-写，通过版本号做乐观并发控制，
//! 不存在跨文档事务。

use async_trait::async_trait;
use domain::{
    FriendAlias, GuestId, Message, MessageId, RepositoryError, Room, RoomId, UserId,
};

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn insert(&self, room: Room) -> Result<Room, RepositoryError>;
    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError>;

    /// 仅当存储中的版本仍为 `expected_version` 时写入，否则返回
    /// [`RepositoryError::Conflict`]。成功时返回版本号加一后的文档。
    async fn update(&self, room: Room, expected_version: u64) -> Result<Room, RepositoryError>;

    /// 查找 `guests` 中包含该访客的房间
    async fn find_by_guest(&self, guest_id: &GuestId) -> Result<Option<Room>, RepositoryError>;
    async fn find_by_member(&self, user_id: UserId) -> Result<Vec<Room>, RepositoryError>;

    /// 按房间名称做不区分大小写的模糊搜索
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Room>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: Message) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 返回 `before` 之前（不含）最近的 `limit` 条消息，按时间正序排列
    async fn list_by_room(
        &self,
        room_id: RoomId,
        limit: usize,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError>;
}

/// 好友备注只读接口，写入由外部资料服务负责。
#[async_trait]
pub trait AliasRepository: Send + Sync {
    /// `owner` 给 `targets` 中各用户设置的备注
    async fn find_by_owner(
        &self,
        owner: UserId,
        targets: &[UserId],
    ) -> Result<Vec<FriendAlias>, RepositoryError>;

    /// `owners` 中各用户给 `target` 设置的备注
    async fn find_by_target(
        &self,
        target: UserId,
        owners: &[UserId],
    ) -> Result<Vec<FriendAlias>, RepositoryError>;
}
