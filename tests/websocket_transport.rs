//! WebSocket transport against a real tokio-tungstenite hub
//!
//! The hub speaks the JSON frame protocol: it greets with `welcome`, pushes a
//! `caseUpdated` event, accepts `JoinGroup` invocations and rejects anything
//! else.

mod common;

use casehub::config::{Platform, RealtimeConfig, TransportProfile};
use casehub::core::auth::{Credential, StaticTokenProvider};
use casehub::core::cache::QueryKey;
use casehub::core::error::{RealtimeError, TransportError};
use casehub::core::events::ConnectionState;
use casehub::realtime::transport::{
    ABNORMAL_CLOSURE, ConnectRequest, InboundFrame, Invoker, TokenFactory, Transport,
};
use casehub::realtime::{RealtimeConnection, WebSocketTransport};
use casehub::storage::InMemoryQueryCache;
use common::{TOKEN, eventually};
use futures::FutureExt;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use url::Url;

#[derive(Clone, Copy)]
enum HubBehavior {
    Serve,
    DropAfterWelcome,
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

/// Start a hub on an ephemeral port
async fn spawn_hub(behavior: HubBehavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_socket(stream, behavior));
        }
    });
    addr
}

async fn serve_socket(stream: tokio::net::TcpStream, behavior: HubBehavior) {
    let check = |request: &Request, response: Response| {
        if request.uri().path().starts_with("/hubs/admin") {
            return Err(reject(StatusCode::FORBIDDEN));
        }
        let bearer = format!("Bearer {}", TOKEN);
        let authorized = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some(bearer.as_str());
        let has_query = request
            .uri()
            .query()
            .is_some_and(|q| q.contains("access_token="));
        if authorized && has_query {
            Ok(response)
        } else {
            Err(reject(StatusCode::UNAUTHORIZED))
        }
    };
    let Ok(mut ws) = accept_hdr_async(stream, check).await else {
        return;
    };

    let welcome = json!({"type": "welcome", "connection_id": "conn-test"});
    if ws.send(Message::Text(welcome.to_string().into())).await.is_err() {
        return;
    }
    if let HubBehavior::DropAfterWelcome = behavior {
        return;
    }

    let event = json!({"type": "event", "target": "caseUpdated", "arguments": [{"id": "case-7"}]});
    if ws.send(Message::Text(event.to_string().into())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let reply = match frame["type"].as_str() {
            Some("invoke") if frame["target"] == "JoinGroup" => json!({
                "type": "completion",
                "invocation_id": frame["invocation_id"],
                "result": true,
            }),
            Some("invoke") => json!({
                "type": "completion",
                "invocation_id": frame["invocation_id"],
                "error": "Method does not exist",
            }),
            Some("ping") => json!({"type": "pong"}),
            _ => continue,
        };
        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
            break;
        }
    }
}

fn token_factory(token: &'static str) -> TokenFactory {
    Arc::new(move || async move { Credential::parse(token) }.boxed())
}

fn request(addr: SocketAddr, path: &str, token: &'static str) -> ConnectRequest {
    ConnectRequest {
        url: Url::parse(&format!("ws://{}{}", addr, path)).unwrap(),
        profile: TransportProfile::android(),
        token_factory: token_factory(token),
    }
}

#[tokio::test]
async fn test_link_delivers_events_and_invocations() {
    let addr = spawn_hub(HubBehavior::Serve).await;

    let mut link = WebSocketTransport::new()
        .connect(request(addr, "/hubs/cases", TOKEN))
        .await
        .unwrap();
    assert_eq!(link.connection_id.as_deref(), Some("conn-test"));

    let frame = timeout(Duration::from_secs(5), link.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        frame,
        InboundFrame::Event {
            target: "caseUpdated".to_string(),
            payload: json!({"id": "case-7"}),
        }
    );

    let joined = link.invoker.invoke("JoinGroup", vec![json!("case-7")]).await.unwrap();
    assert_eq!(joined, json!(true));

    match link.invoker.invoke("AddToGroup", vec![json!("case-7")]).await {
        Err(TransportError::Invocation { method, message }) => {
            assert_eq!(method, "AddToGroup");
            assert_eq!(message, "Method does not exist");
        }
        other => panic!("Expected invocation error, got {:?}", other),
    }

    link.invoker.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_credential_maps_to_unauthorized() {
    let addr = spawn_hub(HubBehavior::Serve).await;
    let other = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJtYWxsb3J5In0.Zm9yZ2Vk";

    let result = WebSocketTransport::new()
        .connect(request(addr, "/hubs/cases", other))
        .await;

    assert!(matches!(result, Err(RealtimeError::Unauthorized)));
}

#[tokio::test]
async fn test_refused_hub_maps_to_forbidden() {
    let addr = spawn_hub(HubBehavior::Serve).await;

    let result = WebSocketTransport::new()
        .connect(request(addr, "/hubs/admin", TOKEN))
        .await;

    match result {
        Err(RealtimeError::Forbidden { endpoint }) => assert_eq!(endpoint, "/hubs/admin"),
        Err(other) => panic!("Expected Forbidden, got {}", other),
        Ok(_) => panic!("Expected Forbidden, got a link"),
    }
}

#[tokio::test]
async fn test_drop_without_close_frame_is_abnormal() {
    let addr = spawn_hub(HubBehavior::DropAfterWelcome).await;

    let mut link = WebSocketTransport::new()
        .connect(request(addr, "/hubs/cases", TOKEN))
        .await
        .unwrap();

    let frame = timeout(Duration::from_secs(5), link.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.is_abnormal_closure());
    assert!(matches!(
        frame,
        InboundFrame::Closed {
            code: Some(ABNORMAL_CLOSURE),
            ..
        }
    ));
}

#[tokio::test]
async fn test_connection_end_to_end() {
    let addr = spawn_hub(HubBehavior::Serve).await;

    let mut config = RealtimeConfig::new(format!("http://{}", addr));
    let mut profile = TransportProfile::android();
    profile.startup_delay_ms = 0;
    config.profiles.insert(Platform::Android, profile);

    let cache = InMemoryQueryCache::new();
    let connection = RealtimeConnection::builder(config, "android")
        .with_token_provider(StaticTokenProvider::new(Some(TOKEN), Some("agent")))
        .with_cache(cache.clone())
        .build()
        .unwrap();

    connection.start_connection().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.connection_id().as_deref(), Some("conn-test"));

    eventually(|| cache.is_stale(&QueryKey::new(["case", "case-7"]))).await;
    assert!(cache.is_stale(&QueryKey::new(["cases"])));

    assert!(connection.join_group("case-7").await);
    assert_eq!(connection.joined_groups(), vec!["case-7"]);

    connection.stop_connection().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.test_connection().success);
}
