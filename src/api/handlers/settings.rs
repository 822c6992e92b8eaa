use crate::api::error::{db_err, respond, HandlerErr, Reply};
use crate::api::types::{AppState, Request};
use crate::credentials;
use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const GLOBAL_KEY: &str = "global";
const PASSKEY_KEY: &str = "passkey";

// Form fields the settings page posts alongside the real settings.
const PASSWORD_FIELDS: [&str; 3] = ["currentPassword", "newPassword", "confirmPassword"];

fn default_global() -> Value {
    json!({
        "email": "admin@example.com",
        "allowPublicTableView": true,
        "enableNotifications": true,
        "darkMode": false,
        "numberOfTables": 10
    })
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_global_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "stored settings must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "email" => {
                let s = parse_string_max(v, k, 200)?.to_ascii_lowercase();
                if !s.contains('@') {
                    return Err("email must be an email address".into());
                }
                obj.insert(k.clone(), Value::String(s));
            }
            "allowPublicTableView" | "enableNotifications" | "darkMode" => {
                obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
            }
            "numberOfTables" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 200)?));
            }
            _ => return Err(format!("unknown settings field: {}", k)),
        }
    }
    Ok(())
}

pub(crate) fn load_global(conn: &Connection) -> rusqlite::Result<Value> {
    let mut current = default_global();
    if let Some(saved) = db::settings_get_json(conn, GLOBAL_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_global_patch(&mut current, &one);
            }
        }
    }
    Ok(current)
}

fn handle_settings_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    load_global(&state.db).map_err(db_err("db_query_failed"))
}

fn handle_settings_put(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(patch) = req.params.as_object() else {
        return Err(HandlerErr::bad_params("settings body must be an object"));
    };
    let mut patch = patch.clone();
    for f in PASSWORD_FIELDS {
        patch.remove(f);
    }

    let conn = &state.db;
    let mut current = load_global(conn).map_err(db_err("db_query_failed"))?;
    merge_global_patch(&mut current, &patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, GLOBAL_KEY, &current).map_err(db_err("db_update_failed"))?;
    Ok(json!({ "success": true, "settings": current }))
}

fn handle_passkey_generate(state: &mut AppState) -> Result<Value, HandlerErr> {
    let passkey = credentials::six_digit_code();
    let expires_at_ms = db::now_ms() + state.cfg.passkey_ttl_secs * 1000;
    let expires_at = db::ms_to_rfc3339(expires_at_ms);
    db::settings_set_json(
        &state.db,
        PASSKEY_KEY,
        &json!({
            "passkey": passkey,
            "expiresAtMs": expires_at_ms,
            "expiresAt": expires_at,
            "createdAt": db::now_rfc3339(),
            "isActive": true
        }),
    )
    .map_err(db_err("db_update_failed"))?;
    tracing::info!(expires_at = %expires_at, "admin passkey generated");
    Ok(json!({
        "success": true,
        "passkey": passkey,
        "expiresAt": expires_at
    }))
}

fn handle_passkey_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    let Some(saved) =
        db::settings_get_json(&state.db, PASSKEY_KEY).map_err(db_err("db_query_failed"))?
    else {
        return Err(HandlerErr::not_found("No passkey found"));
    };
    let expires_at_ms = saved
        .get("expiresAtMs")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if db::now_ms() > expires_at_ms {
        return Err(HandlerErr::new("expired", "Passkey expired"));
    }
    Ok(json!({
        "success": true,
        "passkey": saved.get("passkey").cloned().unwrap_or(Value::Null),
        "expiresAt": saved.get("expiresAt").cloned().unwrap_or(Value::Null),
        "isActive": saved.get("isActive").cloned().unwrap_or(Value::Bool(true))
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.is("GET", "/api/settings") {
        return Some(respond(handle_settings_get(state)));
    }
    if req.is("PUT", "/api/settings") {
        return Some(respond(handle_settings_put(state, req)));
    }
    if req.is("GET", "/api/settings/passkey") {
        return Some(respond(handle_passkey_get(state)));
    }
    if req.is("POST", "/api/settings/passkey") {
        return Some(respond(handle_passkey_generate(state)));
    }
    None
}
