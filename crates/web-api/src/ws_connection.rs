//! WebSocket 会话驱动
//!
//! 握手前先解析身份（失败直接 401），升级成功后才注册连接。
//! 每个连接拆成两个任务：发送任务统一写套接字，接收任务解析客户端帧并调用房间引擎。
//! 直接回复与频道事件走同一条连接事件流，保持先后顺序。

use application::{
    ConnectionId, Credentials, EventStream, JoinStatus, MessageView, SendMessageRequest,
    ServerEvent, Transport,
};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use domain::{Principal, RoomId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::{
    auth::credentials_from_headers,
    error::{client_message, ApiError},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WsQuery {
    token: Option<String>,
    guest_id: Option<String>,
}

/// 客户端上行帧 `{"event": <name>, "data": <payload>}`
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
enum ClientEvent {
    #[serde(rename = "room:join")]
    JoinRoom { room_id: RoomId },
    #[serde(rename = "room:leave")]
    LeaveRoom { room_id: RoomId },
    #[serde(rename = "presence:typing")]
    Typing { room_id: RoomId, is_typing: bool },
    #[serde(rename = "message:send")]
    SendMessage {
        room_id: RoomId,
        text: Option<String>,
        media: Option<String>,
    },
    #[serde(rename = "ping")]
    Ping,
}

pub(crate) async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // 查询参数优先，浏览器无法给握手请求加自定义头
    let from_headers = credentials_from_headers(&headers);
    let credentials = Credentials {
        token: query.token.or(from_headers.token),
        guest_id: query.guest_id.or(from_headers.guest_id),
    };
    let principal = state.identity.resolve(&credentials).await?;

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, principal).run()))
}

/// 单个 WebSocket 连接
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    principal: Principal,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, principal: Principal) -> Self {
        Self {
            socket,
            state,
            principal,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            principal,
        } = self;
        let connection = state.presence.register(principal).await;
        let connection_id = connection.id;
        let principal = connection.principal;

        let (sender, mut incoming) = socket.split();
        let mut send_task = tokio::spawn(forward_events(sender, connection.events));

        let mut recv_task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    let text = match message {
                        WsMessage::Text(text) => text,
                        WsMessage::Close(_) => {
                            tracing::debug!(connection = %connection_id, "WebSocket收到关闭消息");
                            break;
                        }
                        // Ping 由 axum 自动回复 Pong
                        _ => continue,
                    };
                    let Some(reply) =
                        handle_frame(&state, connection_id, &principal, text.as_str()).await
                    else {
                        continue;
                    };
                    if let Err(err) = state.transport.send_to(connection_id, reply).await {
                        tracing::debug!(connection = %connection_id, error = %err, "回复推送失败，结束接收");
                        break;
                    }
                }
            })
        };

        // 任意一侧结束即视为断开
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(connection = %connection_id, "WebSocket发送任务完成");
                recv_task.abort();
            }
            _ = &mut recv_task => {
                tracing::debug!(connection = %connection_id, "WebSocket接收任务完成");
                send_task.abort();
            }
        }

        state.presence.disconnect(connection_id).await;
    }
}

async fn forward_events(
    mut sender: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut events: EventStream,
) {
    while let Some(event) = events.recv().await {
        let payload = match event.to_json() {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(event = event.name(), error = %err, "failed to serialize websocket payload");
                continue;
            }
        };
        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
            tracing::debug!("WebSocket写入失败，连接已关闭");
            break;
        }
    }
}

async fn handle_frame(
    state: &AppState,
    connection: ConnectionId,
    principal: &Principal,
    raw: &str,
) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(err) => {
            return Some(ServerEvent::Error {
                code: "VALIDATION_ERROR".into(),
                message: format!("malformed frame: {err}"),
            })
        }
    };

    let result = match event {
        ClientEvent::JoinRoom { room_id } => state
            .presence
            .join_room(connection, room_id)
            .await
            .map(|status| ServerEvent::RoomJoined {
                room_id,
                already_joined: status == JoinStatus::AlreadyJoined,
            }),
        ClientEvent::LeaveRoom { room_id } => state
            .presence
            .leave_room(connection, room_id)
            .await
            .map(|_| ServerEvent::RoomLeft { room_id }),
        // 输入状态成功时没有回执
        ClientEvent::Typing { room_id, is_typing } => {
            match state.presence.typing(connection, room_id, is_typing).await {
                Ok(()) => return None,
                Err(err) => Err(err),
            }
        }
        ClientEvent::SendMessage {
            room_id,
            text,
            media,
        } => state
            .chat_service
            .send_message(principal, room_id, SendMessageRequest { text, media })
            .await
            .map(|message| ServerEvent::MessageSent {
                message: MessageView::from_message(&message),
            }),
        ClientEvent::Ping => Ok(ServerEvent::Pong),
    };

    Some(result.unwrap_or_else(|err| {
        tracing::debug!(connection = %connection, code = err.code(), error = %err, "客户端请求失败");
        ServerEvent::Error {
            code: err.code().to_owned(),
            message: client_message(&err),
        }
    }))
}
