use crate::api::{self, error::err, AppState, Reply, Request};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

pub type SharedState = Arc<Mutex<AppState>>;

/// Every `/api/*` route goes through the fallback into the same dispatcher the stdio mode uses.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn into_response(reply: Reply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body)).into_response()
}

async fn dispatch(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let mut params = Map::new();
    match Query::<HashMap<String, String>>::try_from_uri(&uri) {
        Ok(Query(q)) => {
            for (k, v) in q {
                params.insert(k, Value::String(v));
            }
        }
        Err(e) => return into_response(err("bad_params", e.body_text(), None)),
    }
    if !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(obj)) => params.extend(obj),
            Ok(Value::Null) => {}
            Ok(_) => {
                return into_response(err("bad_json", "request body must be a JSON object", None))
            }
            Err(e) => return into_response(err("bad_json", e.to_string(), None)),
        }
    }

    let req = Request {
        id: uuid::Uuid::new_v4().to_string(),
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        params: Value::Object(params),
    };
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        api::handle_request(&mut guard, req)
    })
    .await;
    match joined {
        Ok(reply) => into_response(reply),
        Err(e) => into_response(err("internal", e.to_string(), None)),
    }
}

pub async fn serve(state: SharedState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("unable to bind {}", addr))?;
    info!(%addr, "listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "unable to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
