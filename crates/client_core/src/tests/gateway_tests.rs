use super::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::ChatId;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct GatewayState {
    calls: Arc<Mutex<Vec<(String, String, Value)>>>,
}

async fn handle_op(
    State(state): State<GatewayState>,
    Path((phone, op)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state
        .calls
        .lock()
        .await
        .push((phone, op.clone(), body.clone()));

    match op.as_str() {
        "connect" | "disconnect" | "leave" | "send_message" => (StatusCode::OK, Json(json!({}))),
        "join" if body["chat"] == "taken" => (
            StatusCode::CONFLICT,
            Json(json!({"error": "user_already_participant", "message": "already in"})),
        ),
        "join" => (
            StatusCode::OK,
            Json(json!({"id": -1001, "title": "Example", "username": body["chat"]})),
        ),
        "join_by_invite" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invite_hash_expired"})),
        ),
        "export_credential" => (
            StatusCode::OK,
            Json(json!({"session_credential": "exported-session"})),
        ),
        "send_code" => (
            StatusCode::OK,
            Json(json!({"verification_token": "tok-1"})),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "flood_wait", "message": "slow down"})),
        ),
    }
}

async fn spawn_gateway() -> anyhow::Result<(String, GatewayState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = GatewayState::default();
    let app = Router::new()
        .route("/sessions/:phone/:op", post(handle_op))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn phone() -> Phone {
    Phone::parse("79990001122").expect("phone")
}

#[tokio::test]
async fn connect_sends_stored_credential_and_tracks_state() {
    let (base, state) = spawn_gateway().await.expect("gateway");
    let factory = GatewayClientFactory::new(&base).expect("factory");
    let client = factory.client_for(&phone(), Some(&SessionCredential::new("stored")));

    assert!(!client.is_connected());
    client.connect().await.expect("connect");
    assert!(client.is_connected());

    let calls = state.calls.lock().await;
    assert_eq!(calls[0].0, "79990001122");
    assert_eq!(calls[0].1, "connect");
    assert_eq!(calls[0].2["session_credential"], "stored");
}

#[tokio::test]
async fn join_returns_chat_info() {
    let (base, _state) = spawn_gateway().await.expect("gateway");
    let factory = GatewayClientFactory::new(&base).expect("factory");
    let client = factory.client_for(&phone(), None);

    let chat = client.join_by_identifier("example").await.expect("join");
    assert_eq!(chat.id, ChatId(-1001));
    assert_eq!(chat.username.as_deref(), Some("example"));
}

#[tokio::test]
async fn error_codes_map_onto_remote_errors() {
    let (base, _state) = spawn_gateway().await.expect("gateway");
    let factory = GatewayClientFactory::new(&base).expect("factory");
    let client = factory.client_for(&phone(), None);

    assert_eq!(
        client.join_by_identifier("taken").await,
        Err(RemoteError::AlreadyParticipant)
    );
    assert_eq!(
        client.join_by_invite("abc").await,
        Err(RemoteError::InviteHashExpired)
    );
    match client.get_chat("anything").await {
        Err(RemoteError::Other(message)) => assert!(message.contains("slow down")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn exported_credential_is_reused_on_reconnect() {
    let (base, state) = spawn_gateway().await.expect("gateway");
    let factory = GatewayClientFactory::new(&base).expect("factory");
    let client = factory.client_for(&phone(), None);

    let token = client
        .send_verification_code(&phone())
        .await
        .expect("send code");
    assert_eq!(token, VerificationToken("tok-1".into()));

    let credential = client.export_credential().await.expect("export");
    assert_eq!(credential.expose(), "exported-session");

    client.disconnect().await.expect("disconnect");
    assert!(!client.is_connected());
    client.connect().await.expect("reconnect");

    let calls = state.calls.lock().await;
    let reconnect = calls.last().expect("reconnect call");
    assert_eq!(reconnect.2["session_credential"], "exported-session");
}

#[tokio::test]
async fn unreachable_gateway_is_an_other_error() {
    let factory = GatewayClientFactory::new("http://127.0.0.1:9").expect("factory");
    let client = factory.client_for(&phone(), None);
    assert!(matches!(client.connect().await, Err(RemoteError::Other(_))));
    assert!(!client.is_connected());
}
