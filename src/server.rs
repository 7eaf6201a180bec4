//! WebSocket transport for workers plus read-only HTTP introspection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::coordinator::{Coordinator, Stats};
use crate::dispatch::Dispatcher;
use crate::error::ProtocolError;
use crate::protocol::Request;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/live", get(upgrade))
        .route("/users/count", get(user_count))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled. Open worker connections are closed
/// on cancellation as well.
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = build_router(AppState {
        coordinator,
        shutdown: shutdown.clone(),
    });
    info!(addr = ?listener.local_addr().ok(), "accepting worker connections");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

async fn user_count(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "count": state.coordinator.live_connection_count() }))
}

async fn stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.coordinator.stats())
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_worker(socket, state, Some(peer)))
}

async fn serve_worker(mut socket: WebSocket, state: AppState, peer: Option<SocketAddr>) {
    let dispatcher = Dispatcher::new(Arc::clone(&state.coordinator), peer);
    let span = tracing::info_span!("worker", session = dispatcher.session_id(), peer = ?peer);

    async move {
        info!("worker connected");
        loop {
            let received = tokio::select! {
                () = state.shutdown.cancelled() => break,
                received = socket.recv() => received,
            };
            let message = match received {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break;
                }
                None => break,
            };
            match handle_frame(&dispatcher, message) {
                Frame::Reply(text) => {
                    if let Err(e) = socket.send(Message::Text(text.into())).await {
                        debug!(error = %e, "websocket write failed");
                        break;
                    }
                }
                Frame::Silent => {}
                Frame::Close => break,
            }
        }
        drop(dispatcher);
    }
    .instrument(span)
    .await;
}

/// What to do after one inbound frame.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Reply(String),
    Silent,
    Close,
}

fn handle_frame(dispatcher: &Dispatcher, message: Message) -> Frame {
    let text = match message {
        Message::Text(text) => text,
        Message::Binary(_) => {
            warn!(error = %ProtocolError::BinaryFrame, "closing connection");
            return Frame::Close;
        }
        Message::Close(_) => return Frame::Close,
        // Pings are answered by the websocket layer.
        Message::Ping(_) | Message::Pong(_) => return Frame::Silent,
    };

    let request = match Request::parse(text.as_str()) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "closing connection");
            return Frame::Close;
        }
    };
    debug!(operation = request.operation(), "request");
    dispatcher
        .handle(request)
        .map_or(Frame::Silent, |reply| Frame::Reply(reply.to_text()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::AdminAuth;
    use crate::coordinator::CoordinatorOptions;

    fn state() -> AppState {
        let options = CoordinatorOptions {
            width: 8,
            height: 8,
            seed: Some(3),
            ..CoordinatorOptions::default()
        };
        AppState {
            coordinator: Arc::new(Coordinator::new(&options, AdminAuth::disabled())),
            shutdown: CancellationToken::new(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(HttpRequest::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn user_count_reports_live_connections() {
        let state = state();
        let _a = Dispatcher::new(Arc::clone(&state.coordinator), None);
        let _b = Dispatcher::new(Arc::clone(&state.coordinator), None);

        let body = get_json(build_router(state), "/users/count").await;

        assert_eq!(body, json!({ "count": 2 }));
    }

    #[tokio::test]
    async fn stats_route_serializes_counters() {
        let state = state();
        state.coordinator.reconcile();

        let body = get_json(build_router(state), "/stats").await;

        assert_eq!(body["connections"], 0);
        assert_eq!(body["queue_generation"], 1);
        assert_eq!(body["target_pixels"], 0);
    }

    #[tokio::test]
    async fn plain_get_on_socket_route_is_not_upgraded() {
        let app = build_router(state());
        let response = app
            .oneshot(HttpRequest::get("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closing_a_worker_socket_releases_its_capacity() {
        let coordinator = state().coordinator;
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::clone(&coordinator), shutdown.clone()));

        let observed = Arc::clone(&coordinator);
        let (pong, capacity_while_open) = tokio::task::spawn_blocking(move || {
            use tungstenite::Message as WsMessage;

            let (mut socket, _) = tungstenite::connect(format!("ws://{addr}/live")).unwrap();
            socket
                .send(WsMessage::text(
                    r#"{"operation":"handshake","data":{"platform":"bot-v2","version":3,"useraccounts":5}}"#,
                ))
                .unwrap();
            socket.send(WsMessage::text(r#"{"operation":"ping"}"#)).unwrap();
            let pong = socket.read().unwrap().into_text().unwrap().to_string();
            let capacity = observed.aggregate_advertised_capacity();

            socket.close(None).unwrap();
            while socket.read().is_ok() {}
            (pong, capacity)
        })
        .await
        .unwrap();

        assert_eq!(pong, r#"{"pong":true}"#);
        assert_eq!(capacity_while_open, 5);

        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.aggregate_advertised_capacity() != 0
                || coordinator.live_connection_count() != 0
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[test]
    fn frames_map_to_replies() {
        let state = state();
        let dispatcher = Dispatcher::new(Arc::clone(&state.coordinator), None);

        assert_eq!(
            handle_frame(&dispatcher, Message::Text(r#"{"operation":"ping"}"#.into())),
            Frame::Reply(r#"{"pong":true}"#.into())
        );
        assert_eq!(
            handle_frame(&dispatcher, Message::Text(r#"{"operation":"dance"}"#.into())),
            Frame::Silent
        );
        assert_eq!(
            handle_frame(&dispatcher, Message::Text("not json".into())),
            Frame::Close
        );
        assert_eq!(
            handle_frame(&dispatcher, Message::Binary(vec![1, 2, 3].into())),
            Frame::Close
        );
        assert_eq!(handle_frame(&dispatcher, Message::Close(None)), Frame::Close);
    }

    #[test]
    fn request_pixel_frame_without_work_has_empty_data() {
        let state = state();
        let dispatcher = Dispatcher::new(Arc::clone(&state.coordinator), None);

        let Frame::Reply(text) = handle_frame(
            &dispatcher,
            Message::Text(r#"{"operation":"request-pixel","user":"bob"}"#.into()),
        ) else {
            panic!("expected a reply");
        };
        let reply: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            reply,
            json!({"operation": "place-pixel", "user": "bob", "data": {}})
        );
    }
}
