use crate::api::error::{db_err, db_err_table, respond, respond_created, HandlerErr, Reply};
use crate::api::helpers::{get_optional_str, get_required_str, normalize_email};
use crate::api::types::{AppState, Request};
use crate::db;
use rusqlite::Row;
use serde_json::{json, Value};

fn message_json(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "_id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "subject": r.get::<_, String>(3)?,
        "message": r.get::<_, String>(4)?,
        "status": r.get::<_, String>(5)?,
        "createdAt": r.get::<_, String>(6)?,
    }))
}

fn handle_messages_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let mut stmt = state
        .db
        .prepare(
            "SELECT id, name, email, subject, body, status, created_at
             FROM messages
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([], message_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(Value::Array(rows))
}

fn handle_messages_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let name = get_required_str(&req.params, "name")?;
    let email = normalize_email(&get_required_str(&req.params, "email")?);
    let subject = get_required_str(&req.params, "subject")?;
    let body = get_required_str(&req.params, "message")?;
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = db::now_rfc3339();

    state
        .db
        .execute(
            "INSERT INTO messages(id, name, email, subject, body, status, created_at)
             VALUES(?, ?, ?, ?, ?, 'unread', ?)",
            (&id, &name, &email, &subject, &body, &created_at),
        )
        .map_err(db_err_table("db_insert_failed", "messages"))?;

    Ok(json!({
        "_id": id,
        "name": name,
        "email": email,
        "subject": subject,
        "message": body,
        "status": "unread",
        "createdAt": created_at,
    }))
}

fn set_status(state: &mut AppState, id: &str, status: &str) -> Result<Value, HandlerErr> {
    let changed = state
        .db
        .execute("UPDATE messages SET status = ? WHERE id = ?", (status, id))
        .map_err(db_err_table("db_update_failed", "messages"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("Message not found"));
    }
    Ok(json!({ "success": true, "id": id, "status": status }))
}

fn handle_messages_mark_read(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = get_required_str(&req.params, "messageId")?;
    set_status(state, &id, "read")
}

fn handle_messages_set_status(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = get_required_str(&req.params, "id")?;
    let status = get_required_str(&req.params, "status")?.to_ascii_lowercase();
    if status != "read" && status != "unread" {
        return Err(HandlerErr::bad_params("status must be one of: read, unread"));
    }
    set_status(state, &id, &status)
}

fn handle_messages_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = get_optional_str(&req.params, "id")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("Message ID is required"))?;
    let removed = state
        .db
        .execute("DELETE FROM messages WHERE id = ?", [&id])
        .map_err(db_err_table("db_delete_failed", "messages"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("Message not found"));
    }
    Ok(json!({ "success": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.route_path() != "/api/messages" {
        return None;
    }
    let reply = match req.method.to_ascii_uppercase().as_str() {
        "GET" => respond(handle_messages_list(state)),
        "POST" => respond_created(handle_messages_create(state, req)),
        "PUT" => respond(handle_messages_mark_read(state, req)),
        "PATCH" => respond(handle_messages_set_status(state, req)),
        "DELETE" => respond(handle_messages_delete(state, req)),
        _ => return None,
    };
    Some(reply)
}
