use super::settings::load_global;
use crate::api::error::{db_err, respond, HandlerErr, Reply};
use crate::api::types::{AppState, Request};
use crate::records;
use serde_json::{json, Value};

fn handle_health(state: &mut AppState) -> Result<Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "dbPath": state.db_path.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn handle_dashboard_stats(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let count = |table: &str| records::count_rows(conn, table).map_err(db_err("db_query_failed"));
    let settings = load_global(conn).map_err(db_err("db_query_failed"))?;
    Ok(json!({
        "totalStudents": count("students")?,
        "totalUsers": count("users")?,
        "totalTables": settings.get("numberOfTables").cloned().unwrap_or(Value::Null),
        "totalMessages": count("messages")?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.is("GET", "/api/health") {
        return Some(respond(handle_health(state)));
    }
    if req.is("GET", "/api/admin/dashboard-stats") {
        return Some(respond(handle_dashboard_stats(state)));
    }
    None
}
