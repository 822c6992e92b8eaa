use super::handlers;
use super::types::{AppState, Request};
use crate::api::error::{err, Reply};

pub fn handle_request(state: &mut AppState, req: Request) -> Reply {
    tracing::debug!(id = %req.id, method = %req.method, path = %req.path, "dispatch");
    let reply = route(state, &req);
    if reply.status >= 500 {
        tracing::error!(
            id = %req.id,
            method = %req.method,
            path = %req.path,
            status = reply.status,
            error = %reply.body.get("error").and_then(|v| v.as_str()).unwrap_or(""),
            "request failed"
        );
    } else if reply.status >= 400 {
        tracing::warn!(
            id = %req.id,
            method = %req.method,
            path = %req.path,
            status = reply.status,
            error = %reply.body.get("error").and_then(|v| v.as_str()).unwrap_or(""),
            "request rejected"
        );
    }
    reply
}

fn route(state: &mut AppState, req: &Request) -> Reply {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::tables::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::messages::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(state, req) {
        return resp;
    }

    err(
        "not_found",
        format!(
            "no route for {} {}",
            req.method.to_ascii_uppercase(),
            req.route_path()
        ),
        None,
    )
}
