//! 消息发送与个性化扇出。
//!
//! 发送流程：校验正文 -> 读取房间 -> 校验发送者身份 -> 持久化 -> 异步扇出。
//! 持久化之前的任何失败都不会产生写入；扇出中单个频道的失败只记录日志，
//! 不重试，也不会反馈给发送者。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{Message, MessageBody, MessageId, ParticipantId, Principal, Room, RoomId, UserId};
use uuid::Uuid;

use crate::alias::AliasResolver;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::events::{MessageView, ServerEvent};
use crate::repository::{MessageRepository, RoomRepository};
use crate::transport::{Channel, Transport};

#[derive(Debug, Clone, Default)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub media: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MessagePolicy {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for MessagePolicy {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl From<&config::RoomsConfig> for MessagePolicy {
    fn from(value: &config::RoomsConfig) -> Self {
        Self {
            default_page_size: value.default_page_size,
            max_page_size: value.max_page_size,
        }
    }
}

/// 一次扇出的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 收到个性化副本的私有频道数
    pub personalized: usize,
    /// 收到通用副本的私有频道数
    pub generic: usize,
    /// 房间频道上送达的连接数
    pub room_deliveries: usize,
    pub failed_channels: usize,
}

/// 消息扇出器，可以克隆进后台任务。
#[derive(Clone)]
pub struct FanOut {
    aliases: Arc<AliasResolver>,
    transport: Arc<dyn Transport>,
}

impl FanOut {
    pub fn new(aliases: Arc<AliasResolver>, transport: Arc<dyn Transport>) -> Self {
        Self { aliases, transport }
    }

    /// 把已持久化的消息推送给房间：
    /// 有备注的成员在私有频道收到个性化副本，其余成员在私有频道收到通用副本；
    /// 房间频道上的通用副本排除所有已单独推送过的成员，保证每个连接只收到一份。
    pub async fn deliver(&self, room: &Room, message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let generic = MessageView::from_message(message);
        let mut exclude = vec![message.sender.clone()];

        // 访客发送者永远不会被备注
        if let Some(sender_id) = message.sender.member_id() {
            let viewers: Vec<UserId> = room
                .member_ids
                .iter()
                .copied()
                .filter(|id| *id != sender_id)
                .collect();
            let aliases = match self.aliases.aliases_for_viewers(sender_id, &viewers).await {
                Ok(aliases) => aliases,
                Err(err) => {
                    tracing::warn!(
                        room_id = %room.id,
                        message_id = %message.id,
                        error = %err,
                        "备注查询失败，全部使用基础名称"
                    );
                    HashMap::new()
                }
            };

            for viewer in viewers {
                let (view, personalized) = match aliases.get(&viewer) {
                    Some(alias) => (generic.personalized(alias), true),
                    None => (generic.clone(), false),
                };
                let event = ServerEvent::MessageNew { message: view };
                match self
                    .transport
                    .publish(Channel::User(viewer), &event, &[])
                    .await
                {
                    Ok(_) if personalized => report.personalized += 1,
                    Ok(_) => report.generic += 1,
                    Err(err) => {
                        report.failed_channels += 1;
                        tracing::warn!(
                            message_id = %message.id,
                            viewer = %viewer,
                            error = %err,
                            "私有频道推送失败"
                        );
                    }
                }
                exclude.push(ParticipantId::Member(viewer));
            }
        }

        let event = ServerEvent::MessageNew { message: generic };
        match self
            .transport
            .publish(Channel::Room(room.id), &event, &exclude)
            .await
        {
            Ok(delivered) => report.room_deliveries = delivered,
            Err(err) => {
                report.failed_channels += 1;
                tracing::warn!(
                    room_id = %room.id,
                    message_id = %message.id,
                    error = %err,
                    "房间频道推送失败"
                );
            }
        }

        tracing::debug!(message_id = %message.id, report = ?report, "消息扇出完成");
        report
    }
}

pub struct ChatServiceDependencies {
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub aliases: Arc<AliasResolver>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
    fan_out: FanOut,
    policy: MessagePolicy,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies, policy: MessagePolicy) -> Self {
        let fan_out = FanOut::new(deps.aliases.clone(), deps.transport.clone());
        Self {
            deps,
            fan_out,
            policy,
        }
    }

    /// 持久化消息并在后台扇出，返回基础形式的消息（未经任何备注替换）。
    pub async fn send_message(
        &self,
        sender: &Principal,
        room_id: RoomId,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let body = MessageBody::new(request.text, request.media)?;
        let room = self.authorized_room(sender, room_id, "send messages to this room").await?;

        let message = Message::compose(
            MessageId::from(Uuid::new_v4()),
            room_id,
            sender,
            body,
            self.deps.clock.now(),
        );
        let message = self.deps.messages.insert(message).await.map_err(|err| {
            tracing::error!(room_id = %room_id, error = %err, "消息持久化失败");
            ApplicationError::from(err)
        })?;

        tracing::info!(
            room_id = %room_id,
            message_id = %message.id,
            sender = %message.sender,
            "消息已保存"
        );

        let fan_out = self.fan_out.clone();
        let delivered = message.clone();
        tokio::spawn(async move {
            fan_out.deliver(&room, &delivered).await;
        });

        Ok(message)
    }

    /// 历史消息，按时间正序；成员查看时按其备注做个性化。
    pub async fn list_messages(
        &self,
        viewer: &Principal,
        room_id: RoomId,
        limit: Option<u32>,
        before: Option<MessageId>,
    ) -> Result<Vec<MessageView>, ApplicationError> {
        self.authorized_room(viewer, room_id, "read messages of this room")
            .await?;

        let limit = limit
            .unwrap_or(self.policy.default_page_size)
            .clamp(1, self.policy.max_page_size) as usize;
        let messages = self
            .deps
            .messages
            .list_by_room(room_id, limit, before)
            .await?;

        let aliases = match viewer.member_id() {
            Some(viewer_id) => {
                let senders: Vec<UserId> = messages
                    .iter()
                    .filter_map(|message| message.sender.member_id())
                    .filter(|id| *id != viewer_id)
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                match self.deps.aliases.resolve_aliases(viewer_id, &senders).await {
                    Ok(aliases) => aliases,
                    Err(err) => {
                        tracing::warn!(room_id = %room_id, error = %err, "备注查询失败，历史消息使用基础名称");
                        HashMap::new()
                    }
                }
            }
            None => HashMap::new(),
        };

        Ok(messages
            .iter()
            .map(|message| {
                let view = MessageView::from_message(message);
                match message.sender.member_id().and_then(|id| aliases.get(&id)) {
                    Some(alias) => view.personalized(alias),
                    None => view,
                }
            })
            .collect())
    }

    async fn authorized_room(
        &self,
        principal: &Principal,
        room_id: RoomId,
        action: &'static str,
    ) -> Result<Room, ApplicationError> {
        let room = self
            .deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or(ApplicationError::not_found("room"))?;
        let allowed = match principal {
            Principal::Member(member) => room.has_member(member.user_id),
            Principal::Guest(guest) => room.has_guest(&guest.guest_id),
        };
        if !allowed {
            return Err(ApplicationError::forbidden(action));
        }
        Ok(room)
    }
}
