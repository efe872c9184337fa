//! PostgreSQL 文档存储
//!
//! 房间以单行文档保存：成员 id 为 `UUID[]`，访客条目为 JSONB 数组。
//! 条件更新 `WHERE id = $1 AND version = $n` 即乐观并发的比较-交换。

use std::sync::Arc;

use application::{AliasRepository, MessageRepository, RoomRepository};
use async_trait::async_trait;
use domain::{
    FriendAlias, Guest, GuestId, Message, MessageBody, MessageId, ParticipantId, PasswordHash,
    RepositoryError, Room, RoomId, UserId,
};
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const ROOM_COLUMNS: &str = "id, name, member_ids, admin_ids, guests, member_limit, password_hash, \
     avatar, is_temporary, created_by, created_at, updated_at, version";

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: Option<String>,
    member_ids: Vec<Uuid>,
    admin_ids: Vec<Uuid>,
    guests: Json<Vec<Guest>>,
    member_limit: i32,
    password_hash: Option<String>,
    avatar: Option<String>,
    is_temporary: bool,
    created_by: Uuid,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    version: i64,
}

impl TryFrom<RoomRecord> for Room {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let password = value
            .password_hash
            .map(PasswordHash::new)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        let member_limit = u32::try_from(value.member_limit)
            .map_err(|_| invalid_data("negative member_limit"))?;
        let version =
            u64::try_from(value.version).map_err(|_| invalid_data("negative room version"))?;

        Ok(Room {
            id: RoomId::from(value.id),
            name: value.name,
            member_ids: value.member_ids.into_iter().map(UserId::from).collect(),
            admin_ids: value.admin_ids.into_iter().map(UserId::from).collect(),
            guests: value.guests.0,
            member_limit,
            password,
            avatar: value.avatar,
            is_temporary: value.is_temporary,
            created_by: UserId::from(value.created_by),
            created_at: value.created_at,
            updated_at: value.updated_at,
            version,
        })
    }
}

fn uuids(ids: &[UserId]) -> Vec<Uuid> {
    ids.iter().map(|id| Uuid::from(*id)).collect()
}

fn limit_to_i32(limit: u32) -> Result<i32, RepositoryError> {
    i32::try_from(limit).map_err(|_| invalid_data("member_limit out of range"))
}

fn version_to_i64(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| invalid_data("room version out of range"))
}

/// ILIKE 模式里的 `%`、`_` 与转义符按字面量匹配
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: RoomId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1)")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn insert(&self, room: Room) -> Result<Room, RepositoryError> {
        let sql = format!(
            r#"
            INSERT INTO rooms ({ROOM_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            RETURNING {ROOM_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(Uuid::from(room.id))
            .bind(room.name.as_deref())
            .bind(uuids(&room.member_ids))
            .bind(uuids(&room.admin_ids))
            .bind(Json(&room.guests))
            .bind(limit_to_i32(room.member_limit)?)
            .bind(room.password.as_ref().map(PasswordHash::as_str))
            .bind(room.avatar.as_deref())
            .bind(room.is_temporary)
            .bind(Uuid::from(room.created_by))
            .bind(room.created_at)
            .bind(room.updated_at)
            .bind(version_to_i64(room.version)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record
            .ok_or(RepositoryError::Conflict)
            .and_then(Room::try_from)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1");
        let record = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(Room::try_from).transpose()
    }

    async fn update(&self, room: Room, expected_version: u64) -> Result<Room, RepositoryError> {
        let sql = format!(
            r#"
            UPDATE rooms
            SET name = $2, member_ids = $3, admin_ids = $4, guests = $5, member_limit = $6,
                password_hash = $7, avatar = $8, is_temporary = $9, updated_at = $10,
                version = version + 1
            WHERE id = $1 AND version = $11
            RETURNING {ROOM_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(Uuid::from(room.id))
            .bind(room.name.as_deref())
            .bind(uuids(&room.member_ids))
            .bind(uuids(&room.admin_ids))
            .bind(Json(&room.guests))
            .bind(limit_to_i32(room.member_limit)?)
            .bind(room.password.as_ref().map(PasswordHash::as_str))
            .bind(room.avatar.as_deref())
            .bind(room.is_temporary)
            .bind(room.updated_at)
            .bind(version_to_i64(expected_version)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Room::try_from(record),
            None if self.exists(room.id).await? => Err(RepositoryError::Conflict),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_by_guest(&self, guest_id: &GuestId) -> Result<Option<Room>, RepositoryError> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms \
             WHERE guests @> jsonb_build_array(jsonb_build_object('guestId', $1::text)) \
             LIMIT 1"
        );
        let record = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(guest_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(Room::try_from).transpose()
    }

    async fn find_by_member(&self, user_id: UserId) -> Result<Vec<Room>, RepositoryError> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE member_ids @> ARRAY[$1]::uuid[] \
             ORDER BY updated_at DESC"
        );
        let records = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(Room::try_from).collect()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Room>, RepositoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {ROOM_COLUMNS} FROM rooms
            WHERE name IS NOT NULL
              AND (name ILIKE $1 ESCAPE '\' OR word_similarity($2, name) >= 0.4)
            ORDER BY (name ILIKE $1 ESCAPE '\') DESC, word_similarity($2, name) DESC, name
            LIMIT $3
            "#
        );
        let records = sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(format!("%{}%", escape_like(query)))
            .bind(query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(Room::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_kind: String,
    sender_id: String,
    sender_name: String,
    sender_avatar: Option<String>,
    text: Option<String>,
    media: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let sender = match value.sender_kind.as_str() {
            "member" => Uuid::parse_str(&value.sender_id)
                .map(|id| ParticipantId::Member(UserId::from(id)))
                .map_err(|err| invalid_data(err.to_string()))?,
            "guest" => GuestId::parse(value.sender_id)
                .map(ParticipantId::Guest)
                .map_err(|err| invalid_data(err.to_string()))?,
            other => return Err(invalid_data(format!("unknown sender kind: {other}"))),
        };

        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender,
            sender_name: value.sender_name,
            sender_avatar: value.sender_avatar,
            body: MessageBody {
                text: value.text,
                media: value.media,
            },
            created_at: value.created_at,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, room_id, sender_kind, sender_id, sender_name, sender_avatar, text, media, created_at";

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: Message) -> Result<Message, RepositoryError> {
        let sender_kind = if message.is_guest_sender() { "guest" } else { "member" };
        let sql = format!(
            r#"
            INSERT INTO messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(message.room_id))
            .bind(sender_kind)
            .bind(message.sender.to_string())
            .bind(&message.sender_name)
            .bind(message.sender_avatar.as_deref())
            .bind(message.body.text.as_deref())
            .bind(message.body.media.as_deref())
            .bind(message.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn list_by_room(
        &self,
        room_id: RoomId,
        limit: usize,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        // 游标不属于该房间时子查询为 NULL，结果为空
        let records = match before {
            Some(before) => {
                let sql = format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE room_id = $1
                      AND seq < (SELECT seq FROM messages WHERE id = $2 AND room_id = $1)
                    ORDER BY seq DESC
                    LIMIT $3
                    "#
                );
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(Uuid::from(room_id))
                    .bind(Uuid::from(before))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = $1 \
                     ORDER BY seq DESC LIMIT $2"
                );
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(Uuid::from(room_id))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_err)?;

        let mut messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[derive(Debug, FromRow)]
struct AliasRecord {
    owner_id: Uuid,
    target_user_id: Uuid,
    alias: String,
}

impl From<AliasRecord> for FriendAlias {
    fn from(value: AliasRecord) -> Self {
        FriendAlias {
            owner_id: UserId::from(value.owner_id),
            target_user_id: UserId::from(value.target_user_id),
            alias: value.alias,
        }
    }
}

#[derive(Clone)]
pub struct PgAliasRepository {
    pool: PgPool,
}

impl PgAliasRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AliasRepository for PgAliasRepository {
    async fn find_by_owner(
        &self,
        owner: UserId,
        targets: &[UserId],
    ) -> Result<Vec<FriendAlias>, RepositoryError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, AliasRecord>(
            r#"
            SELECT owner_id, target_user_id, alias FROM friend_aliases
            WHERE owner_id = $1 AND target_user_id = ANY($2)
            "#,
        )
        .bind(Uuid::from(owner))
        .bind(uuids(targets))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(FriendAlias::from).collect())
    }

    async fn find_by_target(
        &self,
        target: UserId,
        owners: &[UserId],
    ) -> Result<Vec<FriendAlias>, RepositoryError> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, AliasRecord>(
            r#"
            SELECT owner_id, target_user_id, alias FROM friend_aliases
            WHERE target_user_id = $1 AND owner_id = ANY($2)
            "#,
        )
        .bind(Uuid::from(target))
        .bind(uuids(owners))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(FriendAlias::from).collect())
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub room_repository: Arc<PgRoomRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub alias_repository: Arc<PgAliasRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            alias_repository: Arc::new(PgAliasRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("rust"), "rust");
    }
}
