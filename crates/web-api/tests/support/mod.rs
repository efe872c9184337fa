#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use application::{InMemoryAliasRepository, InMemoryMessageRepository, InMemoryRoomRepository};
use config::RoomsConfig;
use domain::{MemberProfile, UserId};
use futures_util::StreamExt;
use infrastructure::{BcryptPasswordHasher, JwtIdentityProvider};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, Collaborators};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const TEST_SECRET: &str = "web-api-test-secret-with-enough-length";

pub struct TestServer {
    pub base: String,
    pub ws_base: String,
    pub identity: Arc<JwtIdentityProvider>,
    pub aliases: Arc<InMemoryAliasRepository>,
    _shutdown: oneshot::Sender<()>,
}

/// 启动内存存储的完整服务，监听随机端口
pub async fn spawn_server() -> TestServer {
    let identity = Arc::new(JwtIdentityProvider::new(TEST_SECRET, 1));
    let aliases = Arc::new(InMemoryAliasRepository::new());
    let state = AppState::new(
        Collaborators {
            rooms: Arc::new(InMemoryRoomRepository::new()),
            messages: Arc::new(InMemoryMessageRepository::new()),
            aliases: aliases.clone(),
            password_hasher: Arc::new(BcryptPasswordHasher::new(Some(4))),
            identity_provider: identity.clone(),
        },
        &RoomsConfig::default(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        base: format!("http://{addr}/api/v1"),
        ws_base: format!("ws://{addr}/api/v1/ws"),
        identity,
        aliases,
        _shutdown: shutdown_tx,
    }
}

pub fn member(name: &str) -> MemberProfile {
    MemberProfile {
        user_id: UserId::from(Uuid::new_v4()),
        username: name.to_string(),
        avatar: Some(format!("https://pics.example/{name}.png")),
    }
}

impl TestServer {
    pub fn token_for(&self, member: &MemberProfile) -> String {
        self.identity.issue_token(member).expect("issue token")
    }

    pub async fn connect(&self, query: &str) -> WsClient {
        let (ws, _) = connect_async(format!("{}?{query}", self.ws_base))
            .await
            .expect("websocket connect");
        ws
    }
}

pub async fn send_event(ws: &mut WsClient, frame: Value) {
    use futures_util::SinkExt;
    ws.send(WsMessage::text(frame.to_string()))
        .await
        .expect("send frame");
}

/// 读取帧直到满足条件，跳过其余事件
pub async fn next_matching<F>(ws: &mut WsClient, mut predicate: F) -> Value
where
    F: FnMut(&Value) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = ws
                .next()
                .await
                .expect("stream ended")
                .expect("websocket error");
            let Ok(text) = message.to_text() else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(text).expect("json frame");
            if predicate(&value) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn next_event(ws: &mut WsClient, name: &str) -> Value {
    next_matching(ws, |value| value["event"] == name).await
}
