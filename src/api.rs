//! HTTP surface: `POST /records/:key`, `GET /lookup/:key`, `GET /output`.
//!
//! Thin `axum` handlers around the [`Pipeline`] API, generic over any
//! [`IndexStore`] backend: push a record, read the materialized view, or
//! subscribe to the output stream over a WebSocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::Error;
use crate::pipeline::{OutputEvent, Pipeline};
use crate::store::IndexStore;

/// Shared application state handed to every handler.
///
/// `pipeline` is guarded by a plain `parking_lot::Mutex` rather than an async
/// one: handlers never hold the lock across an `.await`, so a blocking mutex
/// is sufficient and cheaper than an async-aware one.
pub struct AppState<S> {
    pipeline: Arc<Mutex<Pipeline<S>>>,
    output_tx: broadcast::Sender<OutputEvent>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            output_tx: self.output_tx.clone(),
        }
    }
}

impl<S: IndexStore> AppState<S> {
    /// Wrap a pipeline for use as axum state, with a broadcast channel for
    /// the `GET /output` WebSocket fan-out.
    pub fn new(pipeline: Pipeline<S>) -> Self {
        let (output_tx, _rx) = broadcast::channel(1024);
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            output_tx,
        }
    }

    /// Fire the wall-clock scan and publish whatever it republishes onto the
    /// output broadcast channel. Called from the background scan task in
    /// `main.rs`.
    pub fn scan_and_broadcast(&self) -> crate::error::Result<()> {
        let outputs = self.pipeline.lock().scan_now()?;
        for event in outputs {
            // A lagging/absent receiver is not an error: nothing is
            // listening on `/output` right now.
            let _ = self.output_tx.send(event);
        }
        Ok(())
    }
}

impl From<Error> for StatusCode {
    fn from(err: Error) -> Self {
        match err {
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `POST /records/:key` — push one input record (a JSON body, or `null` to
/// tombstone the key) into the pipeline.
pub async fn post_record<S: IndexStore + 'static>(
    State(state): State<AppState<S>>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let value = if body.is_null() { None } else { Some(body) };

    let output = {
        let mut pipeline = state.pipeline.lock();
        pipeline.ingest(&key, value).map_err(StatusCode::from)?
    };

    if let Some(output) = &output {
        let _ = state.output_tx.send((key.clone(), Some(output.clone())));
    } else {
        let _ = state.output_tx.send((key.clone(), None));
    }

    Ok(Json(serde_json::json!({ "key": key, "output": output })))
}

/// `GET /lookup/:key` — read the current materialized view for `key`.
pub async fn get_lookup<S: IndexStore + 'static>(
    State(state): State<AppState<S>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let value = state
        .pipeline
        .lock()
        .lookup(&key)
        .map_err(StatusCode::from)?;

    match value {
        Some(value) => Ok(Json(value)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// `GET /output` — upgrade to a WebSocket streaming the emitter's output
/// events (tombstones included) as they occur.
pub async fn output_stream<S: IndexStore + 'static>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
) -> Response {
    let rx = state.output_tx.subscribe();
    ws.on_upgrade(move |socket| handle_output_socket(socket, rx))
}

async fn handle_output_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<OutputEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let (key, value) = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "output socket lagged, dropping buffered events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let payload = serde_json::json!({ "key": key, "value": value });
                let msg = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
                if socket.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

/// `GET /health`
pub async fn health_check() -> impl IntoResponse {
    "ok"
}
