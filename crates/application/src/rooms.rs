//! 房间写入服务。
//!
//! 每个操作都是针对单个房间文档的读-改-写：读取时记下版本号，写入时带上它；
//! 版本冲突时重新读取并重新校验容量与重复成员，重试次数有上限。

use std::sync::Arc;

use domain::{
    DomainError, Guest, MemberProfile, NewRoom, PasswordHash, Principal, RepositoryError, Room,
    RoomId, RoomPatch, Timestamp, UserId,
};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::password::PasswordHasher;
use crate::repository::RoomRepository;

#[derive(Debug, Clone, Copy)]
pub struct RoomPolicy {
    pub default_group_limit: u32,
    pub max_write_retries: u32,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            default_group_limit: 10,
            max_write_retries: 8,
        }
    }
}

impl From<&config::RoomsConfig> for RoomPolicy {
    fn from(value: &config::RoomsConfig) -> Self {
        Self {
            default_group_limit: value.default_group_limit,
            max_write_retries: value.max_write_retries,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub member_ids: Vec<UserId>,
    pub admin_ids: Vec<UserId>,
    pub member_limit: Option<u32>,
    pub avatar: Option<String>,
    pub is_temporary: Option<bool>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub member_limit: Option<u32>,
    pub avatar: Option<String>,
    pub is_temporary: Option<bool>,
    /// 空字符串表示取消密码
    pub password: Option<String>,
}

/// 通过密码入口加入房间的一方
#[derive(Debug, Clone)]
pub enum Joiner {
    Member(MemberProfile),
    Guest {
        display_name: String,
        avatar: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room: Room,
    /// 访客加入时新建的访客条目
    pub guest: Option<Guest>,
}

pub struct RoomServiceDependencies {
    pub rooms: Arc<dyn RoomRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
    policy: RoomPolicy,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies, policy: RoomPolicy) -> Self {
        Self { deps, policy }
    }

    pub async fn create_room(
        &self,
        creator: &MemberProfile,
        request: CreateRoomRequest,
    ) -> Result<Room, ApplicationError> {
        let password = match non_blank(request.password) {
            Some(plaintext) => Some(self.hash_password(&plaintext).await?),
            None => None,
        };

        let room = Room::create(
            RoomId::from(Uuid::new_v4()),
            creator.user_id,
            NewRoom {
                name: request.name,
                member_ids: request.member_ids,
                admin_ids: request.admin_ids,
                member_limit: request.member_limit,
                avatar: request.avatar,
                is_temporary: request.is_temporary,
            },
            password,
            self.policy.default_group_limit,
            self.deps.clock.now(),
        )?;

        let room = self.deps.rooms.insert(room).await.map_err(|err| {
            tracing::error!(error = %err, "保存房间失败");
            ApplicationError::from(err)
        })?;

        tracing::info!(
            room_id = %room.id,
            creator = %creator.user_id,
            kind = ?room.kind(),
            "房间已创建"
        );
        Ok(room)
    }

    /// 管理员把注册用户直接加入房间
    pub async fn add_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
        acting_user: UserId,
    ) -> Result<Room, ApplicationError> {
        let room = self
            .modify(room_id, |room, now| {
                if !room.has_admin(acting_user) {
                    return Err(ApplicationError::forbidden("add members to this room"));
                }
                room.add_member(user_id, now)?;
                Ok(())
            })
            .await?;

        tracing::info!(room_id = %room_id, user_id = %user_id, by = %acting_user, "成员已加入房间");
        Ok(room)
    }

    /// 通过（可选的）房间密码加入。校验顺序：容量 -> 重复成员 -> 密码。
    pub async fn join_with_password(
        &self,
        room_id: RoomId,
        joiner: Joiner,
        password: Option<&str>,
    ) -> Result<JoinOutcome, ApplicationError> {
        // 密码按原样比较，与建房时的哈希输入保持一致；全空白视为未提供
        let password = password.filter(|value| !value.trim().is_empty());
        let guest = match &joiner {
            Joiner::Member(_) => None,
            Joiner::Guest {
                display_name,
                avatar,
            } => Some(Guest::admit(
                display_name.clone(),
                avatar.clone(),
                self.deps.clock.now(),
            )?),
        };

        // 已经校验通过的密码哈希；重试时只有哈希变化才需要重新校验
        let mut verified: Option<PasswordHash> = None;

        for attempt in 1..=self.policy.max_write_retries {
            let mut room = self.load(room_id).await?;
            let expected = room.version;

            match &joiner {
                Joiner::Member(member) => room.ensure_can_admit_member(member.user_id)?,
                Joiner::Guest { .. } => room.ensure_can_admit_guest()?,
            }

            if let Some(hash) = room.password.clone() {
                if verified.as_ref() != Some(&hash) {
                    let plaintext = password.ok_or(DomainError::PasswordRequired)?;
                    if !self.deps.password_hasher.verify(plaintext, &hash).await? {
                        tracing::info!(room_id = %room_id, "房间密码错误");
                        return Err(DomainError::InvalidPassword.into());
                    }
                    verified = Some(hash);
                }
            }

            let now = self.deps.clock.now();
            match (&joiner, &guest) {
                (Joiner::Member(member), _) => room.add_member(member.user_id, now)?,
                (Joiner::Guest { .. }, Some(guest)) => room.add_guest(guest.clone(), now)?,
                (Joiner::Guest { .. }, None) => {
                    return Err(ApplicationError::upstream("guest entry was not prepared"))
                }
            }

            match self.deps.rooms.update(room, expected).await {
                Ok(room) => {
                    match &guest {
                        Some(guest) => tracing::info!(
                            room_id = %room_id,
                            guest_id = %guest.guest_id,
                            "访客已加入房间"
                        ),
                        None => tracing::info!(room_id = %room_id, "成员通过密码入口加入房间"),
                    }
                    return Ok(JoinOutcome { room, guest });
                }
                Err(RepositoryError::Conflict) => {
                    tracing::debug!(room_id = %room_id, attempt, "房间写入版本冲突，重试");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(self.retries_exhausted(room_id))
    }

    /// 管理员修改房间资料
    pub async fn update_room(
        &self,
        room_id: RoomId,
        acting_user: UserId,
        request: UpdateRoomRequest,
    ) -> Result<Room, ApplicationError> {
        let password = match request.password {
            None => None,
            Some(plaintext) if plaintext.trim().is_empty() => Some(None),
            Some(plaintext) => Some(Some(self.hash_password(&plaintext).await?)),
        };
        let patch = RoomPatch {
            name: request.name,
            member_limit: request.member_limit,
            avatar: request.avatar,
            is_temporary: request.is_temporary,
            password,
        };

        let room = self
            .modify(room_id, |room, now| {
                if !room.has_admin(acting_user) {
                    return Err(ApplicationError::forbidden("update this room"));
                }
                room.apply_patch(patch.clone(), now)?;
                Ok(())
            })
            .await?;

        tracing::info!(room_id = %room_id, by = %acting_user, "房间资料已更新");
        Ok(room)
    }

    /// 只有房间的成员或访客可以查看房间资料
    pub async fn get_room_for(
        &self,
        viewer: &Principal,
        room_id: RoomId,
    ) -> Result<Room, ApplicationError> {
        let room = self.load(room_id).await?;
        let allowed = match viewer {
            Principal::Member(member) => room.has_member(member.user_id),
            Principal::Guest(guest) => room.has_guest(&guest.guest_id),
        };
        if !allowed {
            return Err(ApplicationError::forbidden("view this room"));
        }
        Ok(room)
    }

    pub async fn rooms_for_member(&self, user_id: UserId) -> Result<Vec<Room>, ApplicationError> {
        Ok(self.deps.rooms.find_by_member(user_id).await?)
    }

    pub async fn search_rooms(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Room>, ApplicationError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DomainError::invalid_argument("q", "search query cannot be empty").into());
        }
        Ok(self.deps.rooms.search(query, limit.clamp(1, 50)).await?)
    }

    async fn load(&self, room_id: RoomId) -> Result<Room, ApplicationError> {
        self.deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or(ApplicationError::not_found("room"))
    }

    async fn hash_password(&self, plaintext: &str) -> Result<PasswordHash, ApplicationError> {
        Room::validate_password(plaintext)?;
        Ok(self.deps.password_hasher.hash(plaintext).await?)
    }

    /// 带版本校验的读-改-写；`apply` 在每次重试时都基于最新文档重新执行。
    async fn modify<F>(&self, room_id: RoomId, mut apply: F) -> Result<Room, ApplicationError>
    where
        F: FnMut(&mut Room, Timestamp) -> Result<(), ApplicationError> + Send,
    {
        for attempt in 1..=self.policy.max_write_retries {
            let mut room = self.load(room_id).await?;
            let expected = room.version;
            apply(&mut room, self.deps.clock.now())?;

            match self.deps.rooms.update(room, expected).await {
                Ok(room) => return Ok(room),
                Err(RepositoryError::Conflict) => {
                    tracing::debug!(room_id = %room_id, attempt, "房间写入版本冲突，重试");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(self.retries_exhausted(room_id))
    }

    fn retries_exhausted(&self, room_id: RoomId) -> ApplicationError {
        tracing::error!(
            room_id = %room_id,
            retries = self.policy.max_write_retries,
            "房间写入重试次数耗尽"
        );
        ApplicationError::upstream(format!("room {room_id} is too contended, retries exhausted"))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::InMemoryRoomRepository;
    use crate::password::PasswordHasherError;
    use async_trait::async_trait;
    use domain::GuestId;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 明文加前缀的假哈希，测试中避免 bcrypt 的开销
    struct PlainHasher;

    #[async_trait]
    impl PasswordHasher for PlainHasher {
        async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
            PasswordHash::new(format!("plain:{plaintext}"))
                .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
        }

        async fn verify(
            &self,
            plaintext: &str,
            hashed: &PasswordHash,
        ) -> Result<bool, PasswordHasherError> {
            Ok(hashed.as_str() == format!("plain:{plaintext}"))
        }
    }

    fn service() -> (RoomService, Arc<InMemoryRoomRepository>) {
        let rooms = Arc::new(InMemoryRoomRepository::new());
        let service = RoomService::new(
            RoomServiceDependencies {
                rooms: rooms.clone(),
                password_hasher: Arc::new(PlainHasher),
                clock: Arc::new(SystemClock),
            },
            RoomPolicy::default(),
        );
        (service, rooms)
    }

    fn member(name: &str) -> MemberProfile {
        MemberProfile {
            user_id: UserId::from(Uuid::new_v4()),
            username: name.into(),
            avatar: None,
        }
    }

    fn guest(name: &str) -> Joiner {
        Joiner::Guest {
            display_name: name.into(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn create_group_room_hashes_password() {
        let (service, _) = service();
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("book club".into()),
                    password: Some("secret123".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(room.member_limit, 10);
        assert!(room.has_admin(owner.user_id));
        assert_eq!(
            room.password.as_ref().map(PasswordHash::as_str),
            Some("plain:secret123")
        );
    }

    #[tokio::test]
    async fn short_room_password_is_a_validation_error() {
        let (service, _) = service();
        let err = service
            .create_room(
                &member("owner"),
                CreateRoomRequest {
                    name: Some("book club".into()),
                    password: Some("123".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn add_member_requires_admin() {
        let (service, _) = service();
        let owner = member("owner");
        let outsider = member("outsider");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("team".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .add_member(room.id, outsider.user_id, outsider.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Forbidden { .. }));

        let room = service
            .add_member(room.id, outsider.user_id, owner.user_id)
            .await
            .unwrap();
        assert!(room.has_member(outsider.user_id));
        assert_eq!(room.version, 1);

        let err = service
            .add_member(room.id, outsider.user_id, owner.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::AlreadyMember)));
    }

    #[tokio::test]
    async fn join_checks_capacity_before_password() {
        let (service, _) = service();
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("tiny".into()),
                    member_limit: Some(2),
                    password: Some("secret123".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .join_with_password(room.id, guest("visitor"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::PasswordRequired)));

        service
            .join_with_password(room.id, guest("visitor"), Some("secret123"))
            .await
            .unwrap();

        // 房间已满，即便密码错误也先报告 RoomFull
        let err = service
            .join_with_password(room.id, guest("another"), Some("wrong-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::RoomFull)));
    }

    #[tokio::test]
    async fn password_with_surrounding_spaces_is_matched_as_typed() {
        let (service, _) = service();
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("spaced".into()),
                    password: Some(" secret123 ".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .join_with_password(room.id, guest("visitor"), Some("secret123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::InvalidPassword)));

        let err = service
            .join_with_password(room.id, guest("visitor"), Some("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::PasswordRequired)));

        let outcome = service
            .join_with_password(room.id, guest("visitor"), Some(" secret123 "))
            .await
            .unwrap();
        assert_eq!(outcome.room.guests.len(), 1);

        let updated = service
            .update_room(
                room.id,
                owner.user_id,
                UpdateRoomRequest {
                    password: Some("  rotated-pass".into()),
                    ..UpdateRoomRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.requires_password());
        service
            .join_with_password(room.id, Joiner::Member(member("late")), Some("  rotated-pass"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_member_is_reported_before_password() {
        let (service, _) = service();
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("gated".into()),
                    password: Some("secret123".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .join_with_password(room.id, Joiner::Member(owner), Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::AlreadyMember)));
    }

    #[tokio::test]
    async fn update_room_clears_password_with_empty_string() {
        let (service, rooms) = service();
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("gated".into()),
                    password: Some("secret123".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        let updated = service
            .update_room(
                room.id,
                owner.user_id,
                UpdateRoomRequest {
                    password: Some(String::new()),
                    member_limit: Some(4),
                    ..UpdateRoomRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.requires_password());
        assert_eq!(updated.member_limit, 4);

        let stored = rooms.find_by_id(room.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);

        let err = service
            .update_room(room.id, member("other").user_id, UpdateRoomRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn guest_can_view_its_room_only() {
        let (service, _) = service();
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("open house".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();
        let outcome = service
            .join_with_password(room.id, guest("visitor"), None)
            .await
            .unwrap();
        let guest = outcome.guest.unwrap();

        let viewer = Principal::Guest(domain::GuestProfile {
            guest_id: guest.guest_id.clone(),
            display_name: guest.display_name.clone(),
            avatar: None,
        });
        assert!(service.get_room_for(&viewer, room.id).await.is_ok());

        let stranger = Principal::Guest(domain::GuestProfile {
            guest_id: GuestId::generate(),
            display_name: "stranger".into(),
            avatar: None,
        });
        assert!(matches!(
            service.get_room_for(&stranger, room.id).await,
            Err(ApplicationError::Forbidden { .. })
        ));
    }

    /// 写入永远版本冲突的房间存储
    struct AlwaysConflicting {
        inner: InMemoryRoomRepository,
        updates: AtomicU32,
    }

    #[async_trait]
    impl RoomRepository for AlwaysConflicting {
        async fn insert(&self, room: Room) -> Result<Room, RepositoryError> {
            self.inner.insert(room).await
        }

        async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn update(&self, _room: Room, _expected: u64) -> Result<Room, RepositoryError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::Conflict)
        }

        async fn find_by_guest(
            &self,
            guest_id: &GuestId,
        ) -> Result<Option<Room>, RepositoryError> {
            self.inner.find_by_guest(guest_id).await
        }

        async fn find_by_member(&self, user_id: UserId) -> Result<Vec<Room>, RepositoryError> {
            self.inner.find_by_member(user_id).await
        }

        async fn search(&self, query: &str, limit: usize) -> Result<Vec<Room>, RepositoryError> {
            self.inner.search(query, limit).await
        }
    }

    #[tokio::test]
    async fn exhausted_write_retries_become_upstream_errors() {
        let rooms = Arc::new(AlwaysConflicting {
            inner: InMemoryRoomRepository::new(),
            updates: AtomicU32::new(0),
        });
        let service = RoomService::new(
            RoomServiceDependencies {
                rooms: rooms.clone(),
                password_hasher: Arc::new(PlainHasher),
                clock: Arc::new(SystemClock),
            },
            RoomPolicy::default(),
        );
        let owner = member("owner");
        let room = service
            .create_room(
                &owner,
                CreateRoomRequest {
                    name: Some("contended".into()),
                    ..CreateRoomRequest::default()
                },
            )
            .await
            .unwrap();

        let err = service
            .join_with_password(room.id, guest("visitor"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Upstream);
        assert_eq!(err.code(), "UPSTREAM_ERROR");
        assert_eq!(
            rooms.updates.load(Ordering::SeqCst),
            RoomPolicy::default().max_write_retries
        );

        let err = service
            .add_member(room.id, member("late").user_id, owner.user_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Upstream);
        assert_eq!(
            rooms.updates.load(Ordering::SeqCst),
            RoomPolicy::default().max_write_retries * 2
        );
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let (service, _) = service();
        let err = service
            .join_with_password(RoomId::from(Uuid::new_v4()), guest("visitor"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound { resource: "room" }));
    }
}
