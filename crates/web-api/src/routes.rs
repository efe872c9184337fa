use application::{CreateRoomRequest, Joiner, MessageView, SendMessageRequest, UpdateRoomRequest};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use domain::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    auth::{MemberAuth, PrincipalAuth},
    dto::{GuestJoinResponse, RoomView},
    error::ApiError,
    state::AppState,
    ws_connection::websocket_upgrade,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomPayload {
    name: Option<String>,
    #[serde(default)]
    member_ids: Vec<Uuid>,
    #[serde(default)]
    admin_ids: Vec<Uuid>,
    member_limit: Option<u32>,
    avatar: Option<String>,
    is_temporary: Option<bool>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRoomPayload {
    name: Option<String>,
    member_limit: Option<u32>,
    avatar: Option<String>,
    is_temporary: Option<bool>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberPayload {
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestJoinPayload {
    display_name: String,
    avatar: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    text: Option<String>,
    media: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    before: Option<Uuid>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    connections: usize,
}

pub fn router(state: AppState) -> Router {
    router_with_cors(state, CorsLayer::permissive())
}

/// 按配置的来源列表构造 CORS；包含 `*` 时放开全部来源
pub fn cors_from_origins(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router_with_cors(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/rooms", post(create_room).get(my_rooms))
        .route("/rooms/search", get(search_rooms))
        .route("/rooms/{room_id}", get(get_room).patch(update_room))
        .route("/rooms/{room_id}/members", post(add_member))
        .route("/rooms/{room_id}/join", post(join_room))
        .route("/rooms/{room_id}/guests", post(join_as_guest))
        .route(
            "/rooms/{room_id}/messages",
            post(send_message).get(get_history),
        )
        .route("/ws", get(websocket_upgrade))
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        connections: state.transport.connection_count().await,
    })
}

async fn create_room(
    State(state): State<AppState>,
    MemberAuth(member): MemberAuth,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<(StatusCode, Json<RoomView>), ApiError> {
    let room = state
        .room_service
        .create_room(
            &member,
            CreateRoomRequest {
                name: payload.name,
                member_ids: payload.member_ids.into_iter().map(UserId::from).collect(),
                admin_ids: payload.admin_ids.into_iter().map(UserId::from).collect(),
                member_limit: payload.member_limit,
                avatar: payload.avatar,
                is_temporary: payload.is_temporary,
                password: payload.password,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(RoomView::from(&room))))
}

async fn my_rooms(
    State(state): State<AppState>,
    MemberAuth(member): MemberAuth,
) -> Result<Json<Vec<RoomView>>, ApiError> {
    let rooms = state.room_service.rooms_for_member(member.user_id).await?;
    Ok(Json(rooms.iter().map(RoomView::from).collect()))
}

async fn search_rooms(
    State(state): State<AppState>,
    MemberAuth(_member): MemberAuth,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<RoomView>>, ApiError> {
    let rooms = state
        .room_service
        .search_rooms(&query.q, query.limit.unwrap_or(20))
        .await?;
    Ok(Json(rooms.iter().map(RoomView::from).collect()))
}

async fn get_room(
    State(state): State<AppState>,
    PrincipalAuth(principal): PrincipalAuth,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomView>, ApiError> {
    let room = state
        .room_service
        .get_room_for(&principal, RoomId::from(room_id))
        .await?;
    Ok(Json(RoomView::from(&room)))
}

async fn update_room(
    State(state): State<AppState>,
    MemberAuth(member): MemberAuth,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<UpdateRoomPayload>,
) -> Result<Json<RoomView>, ApiError> {
    let room = state
        .room_service
        .update_room(
            RoomId::from(room_id),
            member.user_id,
            UpdateRoomRequest {
                name: payload.name,
                member_limit: payload.member_limit,
                avatar: payload.avatar,
                is_temporary: payload.is_temporary,
                password: payload.password,
            },
        )
        .await?;
    Ok(Json(RoomView::from(&room)))
}

async fn add_member(
    State(state): State<AppState>,
    MemberAuth(member): MemberAuth,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<AddMemberPayload>,
) -> Result<Json<RoomView>, ApiError> {
    let room = state
        .room_service
        .add_member(
            RoomId::from(room_id),
            UserId::from(payload.user_id),
            member.user_id,
        )
        .await?;
    Ok(Json(RoomView::from(&room)))
}

async fn join_room(
    State(state): State<AppState>,
    MemberAuth(member): MemberAuth,
    Path(room_id): Path<Uuid>,
    payload: Option<Json<JoinPayload>>,
) -> Result<Json<RoomView>, ApiError> {
    let password = payload.and_then(|Json(payload)| payload.password);
    let outcome = state
        .room_service
        .join_with_password(
            RoomId::from(room_id),
            Joiner::Member(member),
            password.as_deref(),
        )
        .await?;
    Ok(Json(RoomView::from(&outcome.room)))
}

async fn join_as_guest(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<GuestJoinPayload>,
) -> Result<(StatusCode, Json<GuestJoinResponse>), ApiError> {
    let outcome = state
        .room_service
        .join_with_password(
            RoomId::from(room_id),
            Joiner::Guest {
                display_name: payload.display_name,
                avatar: payload.avatar,
            },
            payload.password.as_deref(),
        )
        .await?;
    let guest = outcome
        .guest
        .ok_or_else(|| ApiError::bad_request("guest entry was not created"))?;

    Ok((
        StatusCode::CREATED,
        Json(GuestJoinResponse {
            guest_id: guest.guest_id.to_string(),
            display_name: guest.display_name,
            avatar: guest.avatar,
            room: RoomView::from(&outcome.room),
        }),
    ))
}

async fn send_message(
    State(state): State<AppState>,
    PrincipalAuth(principal): PrincipalAuth,
    Path(room_id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let message = state
        .chat_service
        .send_message(
            &principal,
            RoomId::from(room_id),
            SendMessageRequest {
                text: payload.text,
                media: payload.media,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(MessageView::from_message(&message))))
}

async fn get_history(
    State(state): State<AppState>,
    PrincipalAuth(principal): PrincipalAuth,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let items = state
        .chat_service
        .list_messages(
            &principal,
            RoomId::from(room_id),
            query.limit,
            query.before.map(MessageId::from),
        )
        .await?;
    Ok(Json(items))
}
