//! End-to-end synchronization against an in-process chat server.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Form, Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use client::{
    ChatApi, ChatSync, ClientError, HttpChatApi, SendRequest, SessionContext, StreamState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use shared::{
    config::ClientConfig,
    models::{ConversationId, Message, MessageId, MessageKind, UserId},
};
use tokio::{net::TcpListener, sync::broadcast};
use url::Url;

const ALICE: i64 = 1;
const BOB: i64 = 2;

fn token_for(user_id: i64, username: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({ "sub": username, "user_id": user_id }).to_string());
    format!("{header}.{claims}.sig")
}

fn text_json(id: i64, conversation: i64, sender: i64, text: &str) -> Value {
    json!({
        "message_id": id,
        "conversation_id": conversation,
        "sender_id": sender,
        "message_text": text,
        "timestamp": "2024-05-01T12:00:00"
    })
}

#[derive(Default)]
struct ServerState {
    channels: Mutex<HashMap<i64, broadcast::Sender<String>>>,
    histories: Mutex<HashMap<i64, Vec<Value>>>,
    sent: Mutex<Vec<Value>>,
    next_id: Mutex<i64>,
}

impl ServerState {
    fn channel(&self, conversation: i64) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .unwrap()
            .entry(conversation)
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn push(&self, conversation: i64, payload: String) {
        let _ = self.channel(conversation).send(payload);
    }

    fn subscribers(&self, conversation: i64) -> usize {
        self.channel(conversation).receiver_count()
    }
}

type Shared = Arc<ServerState>;

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Could not validate credentials" })),
    )
        .into_response()
}

async fn token(Form(form): Form<HashMap<String, String>>) -> Response {
    match (form.get("username").map(String::as_str), form.get("password").map(String::as_str)) {
        (Some("alice"), Some("wonderland")) => Json(json!({
            "access_token": token_for(ALICE, "alice"),
            "token_type": "bearer"
        }))
        .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Incorrect username or password" })),
        )
            .into_response(),
    }
}

async fn resolve(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    if bearer(&headers).is_none() {
        return unauthorized();
    }
    match query.get("recipient_username").map(String::as_str) {
        Some("bob") => Json(42).into_response(),
        Some("carol") => Json(7).into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Recipient user not found" })),
        )
            .into_response(),
    }
}

async fn history(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if bearer(&headers).is_none() {
        return unauthorized();
    }
    let messages = state.histories.lock().unwrap().get(&id).cloned().unwrap_or_default();
    if messages.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "No messages found in this conversation" })),
        )
            .into_response();
    }
    Json(messages).into_response()
}

async fn send_message(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if bearer(&headers).is_none() {
        return unauthorized();
    }
    let conversation = query
        .get("conversation_id")
        .and_then(|value| value.parse::<i64>().ok());
    let (Some(conversation), Some(text)) = (conversation, query.get("message_text")) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": [{"msg": "field required"}]})),
        )
            .into_response();
    };
    if conversation != 42 && conversation != 7 {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"detail": "You are not a participant in this conversation"})),
        )
            .into_response();
    }

    let created = {
        let mut next_id = state.next_id.lock().unwrap();
        *next_id += 1;
        text_json(100 + *next_id, conversation, ALICE, text)
    };
    state.sent.lock().unwrap().push(created.clone());
    Json(created).into_response()
}

async fn push_channel(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if bearer(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let channel = state.channel(id);
    let updates = channel.subscribe();
    upgrade.on_upgrade(move |socket| relay(socket, channel, updates))
}

async fn relay(
    socket: WebSocket,
    channel: broadcast::Sender<String>,
    mut updates: broadcast::Receiver<String>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(payload) => {
                    if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = channel.send(text.to_string());
                }
                Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn spawn_server(state: Shared) -> SocketAddr {
    let app = Router::new()
        .route("/token", post(token))
        .route("/conversations/get-conversation-id", get(resolve))
        .route("/conversations/{id}/messages", get(history))
        .route("/send-message", post(send_message))
        .route("/ws/conversations/{id}", get(push_channel))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        api_base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
        request_timeout_secs: 5,
        ..ClientConfig::with_defaults()
    }
}

async fn wait_until<F>(mut condition: F)
where
    F: AsyncFnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn logged_in_sync(addr: SocketAddr) -> ChatSync {
    let config = config_for(addr);
    let api = HttpChatApi::new(&config).unwrap();
    let token = api.login("alice", "wonderland").await.unwrap();
    let session = Arc::new(SessionContext::new());
    session.login(token.access_token).unwrap();
    ChatSync::connect(&config, session).unwrap()
}

#[tokio::test]
async fn test_history_and_live_messages_merge_without_duplicates() {
    let state = Shared::default();
    state.histories.lock().unwrap().insert(
        42,
        vec![text_json(1, 42, BOB, "hey alice"), text_json(2, 42, ALICE, "hi bob")],
    );
    let addr = spawn_server(state.clone()).await;
    let sync = logged_in_sync(addr).await;

    let report = sync.open_with("bob").await.unwrap();
    assert_eq!(report.conversation_id, ConversationId(42));
    assert_eq!(report.loaded, 2);
    assert_eq!(sync.wait_for_stream().await, StreamState::Open);
    wait_until(async || state.subscribers(42) == 1).await;

    state.push(42, text_json(2, 42, ALICE, "hi bob").to_string());
    state.push(42, "definitely not json".to_string());
    state.push(42, text_json(3, 42, BOB, "how are you?").to_string());
    wait_until(async || sync.snapshot().await.len() == 3).await;

    let sent = sync.send_text("great, thanks").await.unwrap();
    assert_eq!(sent.message_id, MessageId::from(101));
    wait_until(async || sync.snapshot().await.len() == 4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = sync.snapshot().await;
    let ids: Vec<_> = snapshot.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3", "101"]);
    assert_eq!(sync.stream_state().await, StreamState::Open);
    assert_eq!(snapshot[3].sender_id, sync.me().unwrap());
    assert_eq!(state.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_switch_drops_previous_conversation_traffic() {
    let state = Shared::default();
    state
        .histories
        .lock()
        .unwrap()
        .insert(7, vec![text_json(10, 7, 3, "carol here")]);
    let addr = spawn_server(state.clone()).await;
    let sync = logged_in_sync(addr).await;

    let first = sync.open_with("bob").await.unwrap();
    assert!(matches!(first.history_error, Some(ClientError::NotFound(_))));
    sync.wait_for_stream().await;
    wait_until(async || state.subscribers(42) == 1).await;

    sync.open_with("carol").await.unwrap();
    assert_eq!(sync.wait_for_stream().await, StreamState::Open);
    wait_until(async || state.subscribers(42) == 0).await;
    wait_until(async || state.subscribers(7) == 1).await;

    state.push(42, text_json(50, 42, BOB, "for conversation 42").to_string());
    state.push(7, text_json(11, 7, 3, "still here").to_string());
    wait_until(async || sync.snapshot().await.len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = sync.snapshot().await;
    assert!(snapshot.iter().all(|m| m.conversation_id == ConversationId(7)));
    assert_eq!(sync.active_conversation().await, Some(ConversationId(7)));
}

#[tokio::test]
async fn test_image_is_shown_at_once_and_relayed_to_the_peer() {
    let state = Shared::default();
    let addr = spawn_server(state.clone()).await;
    let sync = logged_in_sync(addr).await;
    sync.open_with("bob").await.unwrap();
    sync.wait_for_stream().await;
    let mut peer = state.channel(42).subscribe();

    let image = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    let message = sync.send_image(&image).await.unwrap();

    assert_eq!(message.kind(), MessageKind::Image);
    assert_eq!(message.sender_id, UserId(ALICE));
    assert_eq!(sync.snapshot().await, vec![message.clone()]);

    let relayed = tokio::time::timeout(Duration::from_secs(2), peer.recv())
        .await
        .unwrap()
        .unwrap();
    let relayed: Message = serde_json::from_str(&relayed).unwrap();
    assert_eq!(relayed, message);
    assert!(state.sent.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_non_participant_send_shows_server_detail() {
    let state = Shared::default();
    let addr = spawn_server(state.clone()).await;
    let api = HttpChatApi::new(&config_for(addr)).unwrap();
    let session = SessionContext::new()
        .login(token_for(ALICE, "alice"))
        .unwrap();

    let err = api
        .send(&SendRequest::text(ConversationId(99), "hi"), &session)
        .await
        .unwrap_err();

    assert!(!err.is_auth_failure());
    assert_eq!(
        err.user_message(),
        "You are not a participant in this conversation"
    );
    assert!(state.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_image_never_reaches_the_server() {
    let state = Shared::default();
    let addr = spawn_server(state.clone()).await;
    let sync = logged_in_sync(addr).await;
    sync.open_with("bob").await.unwrap();

    let image = vec![0_u8; ClientConfig::with_defaults().max_image_bytes + 1];
    let err = sync.send_image(&image).await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert!(state.sent.lock().unwrap().is_empty());
    assert!(sync.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_wrong_password_is_reported_as_auth_failure() {
    let state = Shared::default();
    let addr = spawn_server(state).await;
    let api = HttpChatApi::new(&config_for(addr)).unwrap();

    let err = api.login("alice", "guess").await.unwrap_err();
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn test_unknown_recipient_surfaces_server_detail() {
    let state = Shared::default();
    let addr = spawn_server(state).await;
    let sync = logged_in_sync(addr).await;

    let err = sync.open_with("mallory").await.unwrap_err();
    assert_eq!(err.user_message(), "Recipient user not found");
    assert_eq!(sync.active_conversation().await, None);
}
