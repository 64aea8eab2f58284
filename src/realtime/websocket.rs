//! WebSocket transport built on tokio-tungstenite
//!
//! Each link runs two tasks:
//!
//! 1. A write loop that forwards outbound frames from an mpsc channel to the socket
//! 2. A read loop that decodes server frames, resolves pending invocations,
//!    forwards events, sends keep-alive pings and watches the server timeout
//!
//! A socket that ends without a close frame, errors, or stays silent for longer
//! than `server_timeout_ms` is reported as closure code 1006.

use super::protocol::{ClientMessage, ServerMessage};
use super::transport::{
    ABNORMAL_CLOSURE, ConnectRequest, InboundFrame, Invoker, Transport, TransportLink,
};
use crate::config::TransportKind;
use crate::core::error::{RealtimeError, TransportError};
use async_trait::async_trait;
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, TransportError>>>>>;

/// Transport that speaks the hub JSON protocol over a WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

fn map_connect_error(err: WsError, endpoint: &str) -> RealtimeError {
    match err {
        WsError::Http(response) => match response.status().as_u16() {
            401 => RealtimeError::Unauthorized,
            403 => RealtimeError::Forbidden {
                endpoint: endpoint.to_string(),
            },
            status => TransportError::Handshake {
                status: Some(status),
                message: format!("hub answered HTTP {}", status),
            }
            .into(),
        },
        other => TransportError::Handshake {
            status: None,
            message: other.to_string(),
        }
        .into(),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, RealtimeError> {
        if !request
            .profile
            .transport_preference
            .contains(&TransportKind::WebSockets)
        {
            return Err(TransportError::Handshake {
                status: None,
                message: "profile does not allow WebSockets".to_string(),
            }
            .into());
        }

        let credential = request.credential().await?;

        let mut url = request.url.clone();
        url.query_pairs_mut()
            .append_pair("access_token", credential.as_str());

        let mut ws_request =
            url.as_str()
                .into_client_request()
                .map_err(|e| TransportError::InvalidUrl {
                    url: request.url.to_string(),
                    message: e.to_string(),
                })?;
        let header = HeaderValue::from_str(&credential.bearer_header())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        ws_request.headers_mut().insert(AUTHORIZATION, header);

        let (socket, _response) = connect_async(ws_request)
            .await
            .map_err(|e| map_connect_error(e, request.url.path()))?;

        let (ws_write, mut ws_read) = socket.split();
        let server_timeout = request.profile.server_timeout();

        let connection_id = read_welcome(&mut ws_read, server_timeout).await?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundFrame>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(write_loop(ws_write, outbound_rx));
        let reader = tokio::spawn(read_loop(ReadLoop {
            read: ws_read,
            outbound: outbound_tx.clone(),
            inbound: inbound_tx,
            pending: pending.clone(),
            closing: closing.clone(),
            keep_alive: request.profile.keep_alive_interval(),
            server_timeout,
        }));

        tracing::debug!(
            endpoint = %request.url.path(),
            connection_id = ?connection_id,
            "WebSocket link established"
        );

        let invoker = WebSocketInvoker {
            outbound: outbound_tx,
            pending,
            closing,
            invocation_timeout: server_timeout,
            tasks: Mutex::new(vec![reader, writer]),
        };

        Ok(TransportLink {
            connection_id,
            invoker: Arc::new(invoker),
            inbound: inbound_rx,
        })
    }
}

/// Wait for the server's welcome frame
async fn read_welcome(
    read: &mut SplitStream<Socket>,
    timeout: Duration,
) -> Result<Option<String>, RealtimeError> {
    let frame = tokio::time::timeout(timeout, read.next())
        .await
        .map_err(|_| TransportError::Handshake {
            status: None,
            message: "no welcome frame from hub".to_string(),
        })?;

    match frame {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
            Ok(ServerMessage::Welcome { connection_id }) => Ok(Some(connection_id)),
            Ok(ServerMessage::Close { error }) => Err(TransportError::Closed {
                code: None,
                reason: error,
            }
            .into()),
            Ok(other) => Err(TransportError::Protocol(format!(
                "expected welcome frame, got {:?}",
                other
            ))
            .into()),
            Err(e) => Err(TransportError::from(e).into()),
        },
        Some(Ok(Message::Close(frame))) => Err(TransportError::Closed {
            code: frame.as_ref().map(|f| u16::from(f.code)),
            reason: frame.map(|f| f.reason.as_str().to_string()),
        }
        .into()),
        Some(Ok(other)) => Err(TransportError::Protocol(format!(
            "expected text welcome frame, got {:?}",
            other
        ))
        .into()),
        Some(Err(e)) => Err(TransportError::Io(e.to_string()).into()),
        None => Err(TransportError::Closed {
            code: Some(ABNORMAL_CLOSURE),
            reason: Some("socket ended during handshake".to_string()),
        }
        .into()),
    }
}

/// Forward outbound frames to the socket
async fn write_loop(
    mut write: futures::stream::SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            tracing::debug!(error = %e, "WebSocket write failed, stopping write loop");
            break;
        }
        if is_close {
            break;
        }
    }
}

struct ReadLoop {
    read: SplitStream<Socket>,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    pending: PendingMap,
    closing: Arc<AtomicBool>,
    keep_alive: Duration,
    server_timeout: Duration,
}

async fn read_loop(mut ctx: ReadLoop) {
    let mut keep_alive = tokio::time::interval_at(Instant::now() + ctx.keep_alive, ctx.keep_alive);
    let mut deadline = Instant::now() + ctx.server_timeout;

    let closed = loop {
        let silence = tokio::time::sleep_until(deadline);
        tokio::pin!(silence);

        tokio::select! {
            _ = &mut silence => {
                tracing::warn!(
                    timeout_ms = ctx.server_timeout.as_millis() as u64,
                    "No frame from hub within server timeout"
                );
                break InboundFrame::Closed {
                    code: Some(ABNORMAL_CLOSURE),
                    reason: Some("server timeout elapsed".to_string()),
                };
            }
            _ = keep_alive.tick() => {
                if let Ok(json) = serde_json::to_string(&ClientMessage::Ping) {
                    let _ = ctx.outbound.send(Message::Text(json.into()));
                }
            }
            frame = ctx.read.next() => {
                deadline = Instant::now() + ctx.server_timeout;
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(closed) = handle_text(&ctx, &text) {
                            break closed;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break InboundFrame::Closed {
                            code: Some(frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1005)),
                            reason: frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty()),
                        };
                    }
                    Some(Ok(_)) => {
                        // tungstenite answers pings; binary frames are not part of the protocol
                    }
                    Some(Err(e)) => {
                        break InboundFrame::Closed {
                            code: Some(ABNORMAL_CLOSURE),
                            reason: Some(e.to_string()),
                        };
                    }
                    None => {
                        break InboundFrame::Closed {
                            code: Some(ABNORMAL_CLOSURE),
                            reason: Some("socket ended without close frame".to_string()),
                        };
                    }
                }
            }
        }
    };

    fail_pending(&ctx.pending, &closed);

    if !ctx.closing.load(Ordering::SeqCst) {
        let _ = ctx.inbound.send(closed);
    }
}

/// Handle one text frame; returns a closure frame when the server closed
fn handle_text(ctx: &ReadLoop, text: &str) -> Option<InboundFrame> {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable hub frame");
            return None;
        }
    };

    match message {
        ServerMessage::Event { target, arguments } => {
            let payload = ServerMessage::event_payload(&arguments);
            let _ = ctx.inbound.send(InboundFrame::Event { target, payload });
        }
        ServerMessage::Completion {
            invocation_id,
            result,
            error,
        } => {
            let waiter = ctx
                .pending
                .lock()
                .ok()
                .and_then(|mut pending| pending.remove(&invocation_id));
            if let Some(waiter) = waiter {
                let outcome = match error {
                    Some(message) => Err(TransportError::Invocation {
                        method: invocation_id,
                        message,
                    }),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(outcome);
            }
        }
        ServerMessage::Close { error } => {
            return Some(InboundFrame::Closed {
                code: None,
                reason: error,
            });
        }
        ServerMessage::Pong | ServerMessage::Welcome { .. } => {}
    }
    None
}

fn fail_pending(pending: &PendingMap, closed: &InboundFrame) {
    let waiters: Vec<_> = match pending.lock() {
        Ok(mut pending) => pending.drain().map(|(_, tx)| tx).collect(),
        Err(_) => return,
    };
    let (code, reason) = match closed {
        InboundFrame::Closed { code, reason } => (*code, reason.clone()),
        InboundFrame::Event { .. } => (None, None),
    };
    for waiter in waiters {
        let _ = waiter.send(Err(TransportError::Closed {
            code,
            reason: reason.clone(),
        }));
    }
}

struct WebSocketInvoker {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    closing: Arc<AtomicBool>,
    invocation_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketInvoker {
    fn forget(&self, invocation_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(invocation_id);
        }
    }
}

#[async_trait]
impl Invoker for WebSocketInvoker {
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                code: None,
                reason: Some("link is closing".to_string()),
            });
        }

        let message = ClientMessage::invoke(method, arguments);
        let invocation_id = match &message {
            ClientMessage::Invoke { invocation_id, .. } => invocation_id.clone(),
            ClientMessage::Ping => return Err(TransportError::Protocol("not an invocation".into())),
        };
        let json = serde_json::to_string(&message)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| TransportError::Protocol("pending invocations poisoned".into()))?
            .insert(invocation_id.clone(), tx);

        if self.outbound.send(Message::Text(json.into())).is_err() {
            self.forget(&invocation_id);
            return Err(TransportError::Closed {
                code: None,
                reason: Some("write loop stopped".to_string()),
            });
        }

        match tokio::time::timeout(self.invocation_timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(|e| match e {
                TransportError::Invocation { message, .. } => TransportError::Invocation {
                    method: method.to_string(),
                    message,
                },
                other => other,
            }),
            Ok(Err(_)) => Err(TransportError::Closed {
                code: None,
                reason: Some("link dropped before completion".to_string()),
            }),
            Err(_) => {
                self.forget(&invocation_id);
                Err(TransportError::InvocationTimeout {
                    method: method.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sent = self.outbound.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        })));

        // Give the write loop a moment to flush the close frame, then stop reading
        tokio::task::yield_now().await;
        if let Ok(mut tasks) = self.tasks.lock()
            && let Some(reader) = tasks.first()
        {
            reader.abort();
            tasks.clear();
        }

        sent.map_err(|_| TransportError::Closed {
            code: None,
            reason: Some("write loop already stopped".to_string()),
        })
    }
}

impl Drop for WebSocketInvoker {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.lock() {
            for task in tasks.iter() {
                task.abort();
            }
        }
    }
}
