use super::users::user_with_attendance;
use crate::api::error::{db_err, respond, HandlerErr, Reply};
use crate::api::types::{AppState, Request};
use crate::db;
use crate::model::Attendance;
use crate::records;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Turns numerically ordered groups into a JSON object keyed by table number.
fn tables_to_json(groups: BTreeMap<i64, Vec<Value>>) -> Value {
    let mut out = Map::new();
    for (table, rows) in groups {
        out.insert(table.to_string(), Value::Array(rows));
    }
    Value::Object(out)
}

fn handle_students_by_table(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let students = records::list_students(conn).map_err(db_err("db_query_failed"))?;
    let attendance = db::load_all_attendance(conn).map_err(db_err("db_query_failed"))?;
    let default = Attendance::all_present();

    let mut groups: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
    for s in &students {
        let mut v = s.to_json();
        v["fullName"] = Value::String(s.full_name());
        v["attendance"] = attendance
            .get(&s.admission_number)
            .unwrap_or(&default)
            .to_json();
        groups.entry(s.table_number.max(1)).or_default().push(v);
    }
    Ok(tables_to_json(groups))
}

fn handle_users_by_table(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let users = records::list_users(conn).map_err(db_err("db_query_failed"))?;
    let attendance = db::load_all_attendance(conn).map_err(db_err("db_query_failed"))?;
    let default = Attendance::all_present();

    let mut groups: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
    for u in users.iter().filter(|u| !u.is_admin()) {
        let a = attendance.get(&u.admission_number).unwrap_or(&default);
        let table = u.table_number.filter(|n| *n >= 1).unwrap_or(1);
        groups
            .entry(table)
            .or_default()
            .push(user_with_attendance(u, a));
    }
    Ok(tables_to_json(groups))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.is("GET", "/api/students/by-table") {
        return Some(respond(handle_students_by_table(state)));
    }
    if req.is("GET", "/api/users/by-table") {
        return Some(respond(handle_users_by_table(state)));
    }
    None
}
