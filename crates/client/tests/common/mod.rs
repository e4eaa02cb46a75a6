//! In-process fakes for the REST backend and the channel provider.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use socialtodo_core::session::{Session, SessionController};
use tokio::sync::broadcast;

pub const SOCKET_ID: &str = "1234.5678";
pub const APP_KEY: &str = "test-key";

/// Serve `router` on an ephemeral port and return `http://127.0.0.1:{port}`.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake server");
    });
    format!("http://{addr}")
}

/// Session controller already holding `token`.
pub fn signed_in(token: &str) -> Arc<SessionController> {
    let controller = SessionController::in_memory();
    controller
        .start(Session {
            token: token.to_string(),
            user: None,
        })
        .expect("start session");
    Arc::new(controller)
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// Channel provider
// ---------------------------------------------------------------------------

/// Minimal Pusher-protocol server: greets, confirms subscriptions, answers
/// pings, and forwards events pushed through [`FakePusher::emit`].
#[derive(Clone)]
pub struct FakePusher {
    pub ws_url: String,
    state: PusherState,
}

#[derive(Clone, Default)]
struct PusherState {
    events: Arc<Mutex<Option<broadcast::Sender<(String, String)>>>>,
    kick: Arc<Mutex<Option<broadcast::Sender<()>>>>,
    connections: Arc<AtomicUsize>,
    subscribes: Arc<Mutex<Vec<(String, String)>>>,
    unsubscribes: Arc<Mutex<Vec<String>>>,
}

impl PusherState {
    fn events(&self) -> broadcast::Sender<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .get_or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn kick(&self) -> broadcast::Sender<()> {
        self.kick
            .lock()
            .unwrap()
            .get_or_insert_with(|| broadcast::channel(4).0)
            .clone()
    }
}

impl FakePusher {
    pub async fn start() -> Self {
        let state = PusherState::default();
        let router = Router::new()
            .route("/app/{key}", get(pusher_socket))
            .with_state(state.clone());
        let base = serve(router).await.replacen("http://", "ws://", 1);
        Self {
            ws_url: format!("{base}/app/{APP_KEY}?protocol=7&client=test&version=0&flash=false"),
            state,
        }
    }

    /// Send an event to every socket subscribed to `channel`. `data` is
    /// string-encoded the way the provider does it.
    pub fn emit(&self, channel: &str, event: &str, data: Value) {
        let frame = json!({
            "event": event,
            "channel": channel,
            "data": data.to_string(),
        })
        .to_string();
        let _ = self.state.events().send((channel.to_string(), frame));
    }

    /// Abruptly drop every open socket.
    pub fn drop_connections(&self) {
        let _ = self.state.kick().send(());
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// `(channel, auth)` for every subscribe frame received.
    pub fn subscribes(&self) -> Vec<(String, String)> {
        self.state.subscribes.lock().unwrap().clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.state.unsubscribes.lock().unwrap().clone()
    }
}

async fn pusher_socket(ws: WebSocketUpgrade, State(state): State<PusherState>) -> Response {
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(mut socket: WebSocket, state: PusherState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut events = state.events().subscribe();
    let mut kick = state.kick().subscribe();
    let mut subscribed = HashSet::new();

    let hello = json!({
        "event": "pusher:connection_established",
        "data": json!({ "socket_id": SOCKET_ID, "activity_timeout": 120 }).to_string(),
    });
    if socket.send(Message::Text(hello.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = kick.recv() => return,
            event = events.recv() => {
                let Ok((channel, frame)) = event else { continue };
                if subscribed.contains(&channel)
                    && socket.send(Message::Text(frame.into())).await.is_err()
                {
                    return;
                }
            }
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                let channel = frame["data"]["channel"].as_str().unwrap_or_default().to_string();
                let reply = match frame["event"].as_str() {
                    Some("pusher:subscribe") => {
                        let auth = frame["data"]["auth"].as_str().unwrap_or_default().to_string();
                        state.subscribes.lock().unwrap().push((channel.clone(), auth));
                        subscribed.insert(channel.clone());
                        json!({
                            "event": "pusher_internal:subscription_succeeded",
                            "channel": channel,
                            "data": "{}",
                        })
                    }
                    Some("pusher:unsubscribe") => {
                        state.unsubscribes.lock().unwrap().push(channel.clone());
                        subscribed.remove(&channel);
                        continue;
                    }
                    Some("pusher:ping") => json!({ "event": "pusher:pong", "data": "{}" }),
                    _ => continue,
                };
                if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}
