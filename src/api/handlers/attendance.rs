use crate::api::error::{db_err, respond, HandlerErr, Reply};
use crate::api::helpers::{get_optional_bool, get_optional_str};
use crate::api::types::{AppState, Request};
use crate::db;
use crate::model::Attendance;
use crate::records;
use crate::report::{self, RosterEntry, StudentInfo};
use serde_json::{json, Value};
use std::collections::HashMap;

const VISIBILITY_KEY: &str = "attendance-visibility";

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_attendance_report(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let students = records::list_students(conn).map_err(db_err("db_query_failed"))?;
    let users: HashMap<String, records::UserRow> = records::list_users(conn)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|u| (u.admission_number.clone(), u))
        .collect();
    let mut attendance = db::load_all_attendance(conn).map_err(db_err("db_query_failed"))?;

    let entries: Vec<RosterEntry> = students
        .iter()
        .map(|s| {
            let user = users.get(&s.admission_number);
            RosterEntry {
                info: StudentInfo {
                    id: s.id.clone(),
                    name: s.full_name(),
                    class: s.class.clone(),
                    admission_number: s.admission_number.clone(),
                    campus: Some(s.campus.clone()),
                    sick_reason: None,
                },
                is_sick: user.map(|u| u.is_sick).unwrap_or(false),
                sick_reason: user.and_then(|u| u.sick_reason.clone()),
                attendance: attendance
                    .remove(&s.admission_number)
                    .unwrap_or_else(Attendance::all_present),
            }
        })
        .collect();

    to_value(&report::summarize_roster(&entries))
}

fn handle_overview(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let users = records::list_users(conn).map_err(db_err("db_query_failed"))?;
    let mut attendance = db::load_all_attendance(conn).map_err(db_err("db_query_failed"))?;

    let entries: Vec<RosterEntry> = users
        .into_iter()
        .filter(|u| !u.is_admin())
        .map(|u| RosterEntry {
            attendance: attendance
                .remove(&u.admission_number)
                .unwrap_or_else(Attendance::all_present),
            is_sick: u.is_sick,
            sick_reason: u.sick_reason.clone(),
            info: StudentInfo {
                id: u.id,
                name: u.full_name,
                class: u.class,
                admission_number: u.admission_number,
                campus: u.campus,
                sick_reason: None,
            },
        })
        .collect();

    to_value(&report::summarize_accounts(&entries))
}

fn handle_visibility_get(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let saved = db::settings_get_json(conn, VISIBILITY_KEY).map_err(db_err("db_query_failed"))?;
    let saved = match saved {
        Some(v) => v,
        None => {
            let default = json!({
                "isHidden": false,
                "reason": "",
                "updatedAt": db::now_rfc3339(),
                "updatedBy": "system"
            });
            db::settings_set_json(conn, VISIBILITY_KEY, &default)
                .map_err(db_err("db_update_failed"))?;
            tracing::info!("attendance visibility initialised");
            default
        }
    };
    Ok(json!({
        "isHidden": saved.get("isHidden").and_then(|v| v.as_bool()).unwrap_or(false),
        "reason": saved.get("reason").and_then(|v| v.as_str()).unwrap_or(""),
    }))
}

fn handle_visibility_put(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let is_hidden = get_optional_bool(&req.params, "isHidden")?
        .ok_or_else(|| HandlerErr::bad_params("missing isHidden"))?;
    let reason = get_optional_str(&req.params, "reason")?.unwrap_or_default();
    let updated_by = get_optional_str(&req.params, "updatedBy")?
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "admin".to_string());
    db::settings_set_json(
        &state.db,
        VISIBILITY_KEY,
        &json!({
            "isHidden": is_hidden,
            "reason": reason,
            "updatedAt": db::now_rfc3339(),
            "updatedBy": updated_by
        }),
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "success": true, "isHidden": is_hidden, "reason": reason }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.is("GET", "/api/attendance") {
        return Some(respond(handle_attendance_report(state)));
    }
    if req.is("GET", "/api/overview") {
        return Some(respond(handle_overview(state)));
    }
    if req.is("GET", "/api/attendance/visibility") {
        return Some(respond(handle_visibility_get(state)));
    }
    if req.is("PUT", "/api/attendance/visibility") {
        return Some(respond(handle_visibility_put(state, req)));
    }
    None
}
