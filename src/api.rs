use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Sse, sse::KeepAlive},
    routing::{delete, get, post},
};

use chrono::{DateTime, Utc};
use ntrip::MountDescriptor;
use receiver::ReceiverVariant;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::{aggregator::Aggregator, config::Config, statistics::Statistics};

struct ApiState {
    aggregator: Arc<Aggregator>,
    #[allow(dead_code)]
    statistics: Statistics,
    started_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AddReceiverRequest {
    id: String,
    variant: ReceiverVariant,
    path: String,
    #[serde(default = "default_baud")]
    baud: u32,
}

fn default_baud() -> u32 {
    115200
}

fn ok() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn rejected(kind: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "error": kind})))
}

pub mod events {
    use std::sync::LazyLock;

    use axum::response::sse::Event;
    use serde::Serialize;
    use tokio::sync::broadcast::{Sender, channel};
    use tokio_stream::wrappers::BroadcastStream;

    static CHANNEL: LazyLock<Sender<Event>> = LazyLock::new(|| channel(10).0);

    pub fn get_event_stream() -> BroadcastStream<Event> {
        BroadcastStream::new(CHANNEL.subscribe())
    }

    pub fn send_with_stream<T, F>(event: &str, handle: F)
    where
        F: FnOnce() -> T,
        T: Serialize,
    {
        if CHANNEL.receiver_count() > 0 {
            let _ = CHANNEL.send(Event::default().event(event).json_data(handle()).unwrap());
        }
    }
}

/// Start the control/publish HTTP server.
///
/// Warn: this http server does not contain any means of authentication;
/// sensitive information and dangerous operations can be obtained through
/// this service, please do not expose it directly to an unsafe environment.
pub async fn start_server(config: Arc<Config>, aggregator: Arc<Aggregator>, statistics: Statistics) -> anyhow::Result<()> {
    let state = Arc::new(ApiState {
        aggregator,
        statistics,
        started_at: Utc::now(),
    });

    let app = Router::new()
        .route(
            "/receivers",
            post(
                |State(state): State<Arc<ApiState>>, Json(body): Json<AddReceiverRequest>| async move {
                    if state.aggregator.add_receiver(body.id, body.variant, body.path, body.baud) {
                        ok().into_response()
                    } else {
                        rejected("capacity_or_duplicate").into_response()
                    }
                },
            ),
        )
        .route(
            "/receivers/{id}",
            delete(|State(state): State<Arc<ApiState>>, Path(id): Path<String>| async move {
                state.aggregator.remove_receiver(&id).await;
                ok()
            }),
        )
        .route(
            "/receivers/{id}/connect",
            post(|State(state): State<Arc<ApiState>>, Path(id): Path<String>| async move {
                if state.aggregator.connect_receiver(&id).await {
                    ok().into_response()
                } else {
                    rejected("connection_error").into_response()
                }
            }),
        )
        .route(
            "/receivers/{id}/inject",
            post(
                |State(state): State<Arc<ApiState>>, Path(id): Path<String>, body: Bytes| async move {
                    if state.aggregator.inject_to(&id, body) {
                        ok().into_response()
                    } else {
                        rejected("write_error").into_response()
                    }
                },
            ),
        )
        .route(
            "/streams/start",
            post(|State(state): State<Arc<ApiState>>| async move {
                state.aggregator.start_all_streams();
                ok()
            }),
        )
        .route(
            "/streams/stop",
            post(|State(state): State<Arc<ApiState>>| async move {
                state.aggregator.stop_all_streams().await;
                ok()
            }),
        )
        .route(
            "/mounts",
            post(
                |State(state): State<Arc<ApiState>>, Json(descriptor): Json<MountDescriptor>| async move {
                    state.aggregator.add_mount(descriptor);
                    ok()
                },
            ),
        )
        .route(
            "/ntrip/start",
            post(|State(state): State<Arc<ApiState>>| async move {
                if state.aggregator.start_ntrip().await {
                    ok().into_response()
                } else {
                    rejected("no_mount_connected").into_response()
                }
            }),
        )
        .route(
            "/ntrip/stop",
            post(|State(state): State<Arc<ApiState>>| async move {
                state.aggregator.stop_ntrip().await;
                ok()
            }),
        )
        .route(
            "/status",
            get(|State(state): State<Arc<ApiState>>| async move {
                let mut body = serde_json::to_value(state.aggregator.status()).unwrap_or_default();
                if let Some(obj) = body.as_object_mut() {
                    let uptime = Utc::now().signed_duration_since(state.started_at).num_seconds();
                    obj.insert("uptime_secs".to_string(), json!(uptime));
                }
                Json(body)
            }),
        )
        .route(
            "/events",
            get(|| async move { Sse::new(events::get_event_stream()).keep_alive(KeepAlive::default()) }),
        );

    let listener = TcpListener::bind(config.server.api_listen).await?;
    log::info!("api server listening={:?}", config.server.api_listen);

    axum::serve(listener, app.with_state(state)).await?;
    Ok(())
}
