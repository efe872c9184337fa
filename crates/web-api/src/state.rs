use std::sync::Arc;

use application::{
    AliasRepository, AliasResolver, ChatService, ChatServiceDependencies, Clock, IdentityProvider,
    IdentityResolver, LocalTransport, MessagePolicy, MessageRepository, PasswordHasher,
    PresenceDependencies, PresenceManager, RoomPolicy, RoomRepository, RoomService,
    RoomServiceDependencies, SystemClock,
};
use config::RoomsConfig;
use infrastructure::Infrastructure;

/// 组装服务所需的外部协作者
pub struct Collaborators {
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub aliases: Arc<dyn AliasRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub identity_provider: Arc<dyn IdentityProvider>,
}

impl From<&Infrastructure> for Collaborators {
    fn from(infra: &Infrastructure) -> Self {
        Self {
            rooms: infra.rooms.clone(),
            messages: infra.messages.clone(),
            aliases: infra.aliases.clone(),
            password_hasher: infra.password_hasher.clone(),
            identity_provider: infra.identity.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<IdentityResolver>,
    pub room_service: Arc<RoomService>,
    pub chat_service: Arc<ChatService>,
    pub presence: Arc<PresenceManager>,
    pub transport: Arc<LocalTransport>,
}

impl AppState {
    pub fn new(collaborators: Collaborators, rooms_config: &RoomsConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let transport = Arc::new(LocalTransport::new());
        let aliases = Arc::new(AliasResolver::new(collaborators.aliases));
        let identity = Arc::new(IdentityResolver::new(
            collaborators.identity_provider,
            collaborators.rooms.clone(),
        ));

        let room_service = Arc::new(RoomService::new(
            RoomServiceDependencies {
                rooms: collaborators.rooms.clone(),
                password_hasher: collaborators.password_hasher,
                clock: clock.clone(),
            },
            RoomPolicy::from(rooms_config),
        ));
        let chat_service = Arc::new(ChatService::new(
            ChatServiceDependencies {
                rooms: collaborators.rooms.clone(),
                messages: collaborators.messages,
                aliases: aliases.clone(),
                transport: transport.clone(),
                clock,
            },
            MessagePolicy::from(rooms_config),
        ));
        let presence = Arc::new(PresenceManager::new(PresenceDependencies {
            identity: identity.clone(),
            rooms: collaborators.rooms,
            aliases,
            transport: transport.clone(),
        }));

        Self {
            identity,
            room_service,
            chat_service,
            presence,
            transport,
        }
    }

    pub fn from_infrastructure(infra: &Infrastructure, rooms_config: &RoomsConfig) -> Self {
        Self::new(Collaborators::from(infra), rooms_config)
    }
}
