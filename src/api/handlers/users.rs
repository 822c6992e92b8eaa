use crate::api::error::{db_err, db_err_table, respond, respond_created, HandlerErr, Reply};
use crate::api::helpers::{
    get_optional_bool, get_optional_i64, get_optional_str, get_required_str, normalize_email,
};
use crate::api::types::{AppState, Request};
use crate::credentials;
use crate::db;
use crate::model::{parse_class, split_full_name, Attendance, Campus, Meal, Role};
use crate::records::{self, StudentRow, UserRow};
use rusqlite::Connection;
use serde_json::{json, Value};

pub(super) fn user_with_attendance(user: &UserRow, attendance: &Attendance) -> Value {
    let mut v = user.to_json();
    v["attendance"] = attendance.to_json();
    v
}

fn load_user_json(conn: &Connection, user: &UserRow) -> Result<Value, HandlerErr> {
    let attendance =
        db::load_attendance(conn, &user.admission_number).map_err(db_err("db_query_failed"))?;
    Ok(user_with_attendance(user, &attendance))
}

/// Inserts a student account linked to `student` and resets the shared meal rows to present.
pub(super) fn create_account(
    conn: &Connection,
    student: &StudentRow,
    full_name: &str,
    email: &str,
    password: &str,
) -> Result<UserRow, HandlerErr> {
    let id = uuid::Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "INSERT INTO users(id, admission_number, full_name, email, password_hash, role, class,
                           campus, table_number, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student.admission_number,
            full_name,
            email,
            credentials::hash_password(password),
            Role::Student.as_str(),
            student.class.as_deref(),
            &student.campus,
            student.table_number,
            db::now_rfc3339(),
        ),
    )
    .map_err(db_err_table("db_insert_failed", "users"))?;
    db::save_attendance(&tx, &student.admission_number, &Attendance::all_present())
        .map_err(db_err_table("db_update_failed", "meal_attendance"))?;
    tx.execute(
        "UPDATE students SET is_present = 1, updated_at = ? WHERE id = ?",
        (db::now_rfc3339(), &student.id),
    )
    .map_err(db_err_table("db_update_failed", "students"))?;
    tx.commit().map_err(db_err("db_tx_failed"))?;

    tracing::info!(admission_number = %student.admission_number, "account created");
    records::user_by_id(conn, &id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("internal", "user vanished after insert"))
}

fn require_user(conn: &Connection, admission_number: &str) -> Result<UserRow, HandlerErr> {
    records::user_by_admission(conn, admission_number)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("User not found"))
}

fn handle_users_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    if let Some(adm) = get_optional_str(&req.params, "admissionNumber")?.filter(|s| !s.is_empty()) {
        return match records::user_by_admission(conn, &adm).map_err(db_err("db_query_failed"))? {
            Some(u) => load_user_json(conn, &u),
            None => Ok(Value::Null),
        };
    }
    let users = records::list_users(conn).map_err(db_err("db_query_failed"))?;
    let all = db::load_all_attendance(conn).map_err(db_err("db_query_failed"))?;
    let default = Attendance::all_present();
    Ok(Value::Array(
        users
            .iter()
            .map(|u| user_with_attendance(u, all.get(&u.admission_number).unwrap_or(&default)))
            .collect(),
    ))
}

fn handle_users_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let admission_number = get_required_str(&req.params, "admissionNumber")?;
    let full_name = get_required_str(&req.params, "fullName")?;
    let email = normalize_email(&get_required_str(&req.params, "email")?);
    let password = get_required_str(&req.params, "password")?;
    let conn = &state.db;

    let Some(student) =
        records::student_by_admission(conn, &admission_number).map_err(db_err("db_query_failed"))?
    else {
        return Err(HandlerErr::bad_params(
            "Admission number not found in student records",
        ));
    };
    if records::user_by_admission(conn, &admission_number)
        .map_err(db_err("db_query_failed"))?
        .is_some()
    {
        return Err(HandlerErr::new(
            "duplicate",
            "User already exists with this admission number",
        ));
    }
    if records::user_by_email(conn, &email)
        .map_err(db_err("db_query_failed"))?
        .is_some()
    {
        return Err(HandlerErr::new("duplicate", "Email address is already in use"));
    }

    let user = create_account(conn, &student, &full_name, &email, &password)?;
    Ok(json!({ "success": true, "user": load_user_json(conn, &user)? }))
}

fn write_sick_flag(
    conn: &Connection,
    user: &UserRow,
    is_sick: bool,
    reason: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE users SET is_sick = ?, sick_reason = ?, updated_at = ? WHERE id = ?",
        (
            is_sick as i64,
            if is_sick { reason } else { None },
            db::now_rfc3339(),
            &user.id,
        ),
    )
    .map_err(db_err_table("db_update_failed", "users"))?;
    Ok(())
}

/// Writes a new sick flag and the matching meal rows in one transaction.
fn apply_sick_status(
    conn: &Connection,
    user: &UserRow,
    is_sick: bool,
    reason: Option<&str>,
    attendance: &mut Attendance,
) -> Result<(), HandlerErr> {
    if is_sick {
        attendance.mark_sick(reason);
    } else {
        attendance.clear_sick();
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    write_sick_flag(&tx, user, is_sick, reason)?;
    db::save_attendance(&tx, &user.admission_number, attendance)
        .map_err(db_err_table("db_update_failed", "meal_attendance"))?;
    tx.commit().map_err(db_err("db_tx_failed"))?;
    Ok(())
}

fn handle_users_update_attendance(
    state: &mut AppState,
    req: &Request,
) -> Result<Value, HandlerErr> {
    let admission_number = get_required_str(&req.params, "admissionNumber")?;
    let conn = &state.db;
    let user = require_user(conn, &admission_number)?;
    let mut attendance =
        db::load_attendance(conn, &admission_number).map_err(db_err("db_query_failed"))?;

    let is_sick = get_optional_bool(&req.params, "isSick")?;
    let reason = get_optional_str(&req.params, "sickReason")?.filter(|s| !s.is_empty());
    let patch = req.params.get("attendance").filter(|v| !v.is_null());
    if is_sick.is_none() && patch.is_none() {
        return Ok(json!({ "success": true, "attendance": attendance.to_json() }));
    }

    // Everything is validated on the in-memory copy before the first write.
    if is_sick == Some(false) {
        attendance.clear_sick();
    }
    if let Some(patch) = patch {
        if is_sick.unwrap_or(user.is_sick) {
            return Err(HandlerErr::new(
                "invalid_state",
                "attendance cannot be changed while marked sick",
            ));
        }
        attendance
            .apply_patch(patch)
            .map_err(HandlerErr::bad_params)?;
    }
    if is_sick == Some(true) {
        attendance.mark_sick(reason.as_deref());
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Some(flag) = is_sick {
        write_sick_flag(&tx, &user, flag, reason.as_deref())?;
    }
    db::save_attendance(&tx, &admission_number, &attendance)
        .map_err(db_err_table("db_update_failed", "meal_attendance"))?;
    tx.commit().map_err(db_err("db_tx_failed"))?;

    Ok(json!({ "success": true, "attendance": attendance.to_json() }))
}

fn handle_users_update_sick_status(
    state: &mut AppState,
    req: &Request,
) -> Result<Value, HandlerErr> {
    let admission_number = get_required_str(&req.params, "admissionNumber")?;
    let is_sick = get_optional_bool(&req.params, "isSick")?
        .ok_or_else(|| HandlerErr::bad_params("missing isSick"))?;
    let reason = get_optional_str(&req.params, "sickReason")?.filter(|s| !s.is_empty());
    let conn = &state.db;
    let user = require_user(conn, &admission_number)?;
    let mut attendance =
        db::load_attendance(conn, &admission_number).map_err(db_err("db_query_failed"))?;
    apply_sick_status(conn, &user, is_sick, reason.as_deref(), &mut attendance)?;
    tracing::info!(admission_number = %admission_number, is_sick, "sick status updated");
    Ok(json!({
        "success": true,
        "isSick": is_sick,
        "attendance": attendance.to_json()
    }))
}

fn handle_users_toggle_meal(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let admission_number = get_optional_str(&req.params, "admissionNumber")?.filter(|s| !s.is_empty());
    let meal_id = get_optional_str(&req.params, "mealId")?.filter(|s| !s.is_empty());
    let (Some(admission_number), Some(meal_id)) = (admission_number, meal_id) else {
        return Err(HandlerErr::bad_params(
            "Admission number and meal ID are required",
        ));
    };
    let meal = Meal::parse(&meal_id)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown meal: {}", meal_id)))?;

    let conn = &state.db;
    let user = require_user(conn, &admission_number)?;
    if user.is_sick {
        return Err(HandlerErr::new(
            "invalid_state",
            "attendance cannot be changed while marked sick",
        ));
    }
    let mut attendance =
        db::load_attendance(conn, &admission_number).map_err(db_err("db_query_failed"))?;
    let mut status = attendance.get(meal).clone();
    status.present = !status.present;
    attendance.set(meal, status);
    db::save_attendance(conn, &admission_number, &attendance)
        .map_err(db_err_table("db_update_failed", "meal_attendance"))?;

    Ok(json!({ "success": true, "attendance": attendance.to_json() }))
}

fn handle_user_edit(state: &mut AppState, req: &Request, id: &str) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let current = records::user_by_id(conn, id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("User not found"))?;
    let p = &req.params;

    let role = match get_optional_str(p, "role")? {
        None => Role::parse(&current.role).unwrap_or(Role::Student),
        Some(s) => {
            Role::parse(&s).ok_or_else(|| HandlerErr::bad_params(format!("unknown role: {}", s)))?
        }
    };
    if current.is_admin() && role != Role::Admin {
        return Err(HandlerErr::new("forbidden", "Cannot change admin role"));
    }

    let new_full_name = get_optional_str(p, "fullName")?.filter(|s| !s.is_empty());
    // The roster name only follows the account when a new full name is sent.
    let roster_name = new_full_name.as_deref().map(split_full_name);
    let full_name = new_full_name.unwrap_or_else(|| current.full_name.clone());
    let admission_number = get_optional_str(p, "admissionNumber")?
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| current.admission_number.clone());
    let email = match get_optional_str(p, "email")? {
        Some(s) if !s.is_empty() => Some(normalize_email(&s)),
        _ => current.email.clone(),
    };
    let class = match get_optional_str(p, "class")?.filter(|s| !s.is_empty()) {
        Some(s) => Some(
            parse_class(&s)
                .ok_or_else(|| HandlerErr::bad_params("Valid class is required"))?
                .to_string(),
        ),
        None => current.class.clone(),
    };
    let campus = match get_optional_str(p, "campus")?.filter(|s| !s.is_empty()) {
        Some(s) => Some(
            Campus::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params(format!("Unknown campus: {}", s)))?
                .name()
                .to_string(),
        ),
        None => current.campus.clone(),
    };
    let table_number = match get_optional_i64(p, "tableNumber")? {
        Some(n) if n < 1 => return Err(HandlerErr::bad_params("Valid table number is required")),
        Some(n) => Some(n),
        None => current.table_number,
    };

    let rekeyed = admission_number != current.admission_number;
    if rekeyed {
        // Any roster row holding the new number belongs to someone else: the linked row
        // still carries the old number.
        let taken_by_user = records::user_by_admission(conn, &admission_number)
            .map_err(db_err("db_query_failed"))?
            .is_some();
        let taken_by_student = records::student_by_admission(conn, &admission_number)
            .map_err(db_err("db_query_failed"))?
            .is_some();
        if taken_by_user || taken_by_student {
            return Err(HandlerErr::new("duplicate", "Admission number already exists"));
        }
    }
    if let Some(e) = &email {
        if let Some(other) = records::user_by_email(conn, e).map_err(db_err("db_query_failed"))? {
            if other.id != current.id {
                return Err(HandlerErr::new("duplicate", "Email address is already in use"));
            }
        }
    }

    let now = db::now_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "UPDATE users
         SET admission_number = ?, full_name = ?, email = ?, role = ?, class = ?, campus = ?,
             table_number = ?, updated_at = ?
         WHERE id = ?",
        (
            &admission_number,
            &full_name,
            email.as_deref(),
            role.as_str(),
            class.as_deref(),
            campus.as_deref(),
            table_number,
            &now,
            id,
        ),
    )
    .map_err(db_err_table("db_update_failed", "users"))?;

    let (first_name, last_name) = match roster_name {
        Some((first, last)) => (Some(first), Some(last)),
        None => (None, None),
    };
    tx.execute(
        "UPDATE students
         SET admission_number = ?, first_name = COALESCE(?, first_name),
             last_name = COALESCE(?, last_name),
             class = COALESCE(?, class), campus = COALESCE(?, campus),
             table_number = COALESCE(?, table_number), updated_at = ?
         WHERE admission_number = ?",
        (
            &admission_number,
            &first_name,
            &last_name,
            class.as_deref(),
            campus.as_deref(),
            table_number,
            &now,
            &current.admission_number,
        ),
    )
    .map_err(db_err_table("db_update_failed", "students"))?;
    if rekeyed {
        db::rekey_attendance(&tx, &current.admission_number, &admission_number)
            .map_err(db_err_table("db_update_failed", "meal_attendance"))?;
    }
    tx.commit().map_err(db_err("db_tx_failed"))?;

    Ok(json!({ "success": true, "id": id }))
}

fn handle_user_delete(state: &mut AppState, id: &str) -> Result<Value, HandlerErr> {
    let conn = &state.db;
    let user = records::user_by_id(conn, id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("User not found"))?;
    if user.is_admin() {
        return Err(HandlerErr::new("forbidden", "Cannot delete admin users"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute("DELETE FROM users WHERE id = ?", [id])
        .map_err(db_err_table("db_delete_failed", "users"))?;
    // Without rows every meal reads as present again.
    db::delete_attendance(&tx, &user.admission_number)
        .map_err(db_err_table("db_delete_failed", "meal_attendance"))?;
    tx.execute(
        "UPDATE students SET is_present = 1, updated_at = ? WHERE admission_number = ?",
        (db::now_rfc3339(), &user.admission_number),
    )
    .map_err(db_err_table("db_update_failed", "students"))?;
    tx.commit().map_err(db_err("db_tx_failed"))?;

    tracing::info!(admission_number = %user.admission_number, "account deleted");
    Ok(json!({ "success": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.route_path() == "/api/users" {
        let reply = match req.method.to_ascii_uppercase().as_str() {
            "GET" => respond(handle_users_get(state, req)),
            "POST" => respond_created(handle_users_create(state, req)),
            "PUT" => respond(handle_users_update_attendance(state, req)),
            _ => return None,
        };
        return Some(reply);
    }
    if req.is("PATCH", "/api/users/attendance") {
        return Some(respond(handle_users_toggle_meal(state, req)));
    }
    if req.is("PUT", "/api/users/update-sick-status") {
        return Some(respond(handle_users_update_sick_status(state, req)));
    }
    // `/api/users/{id}`; the named sub-routes above and `by-table` never reach here as ids.
    let id = req.tail_after("/api/users/")?;
    if matches!(id, "attendance" | "update-sick-status" | "by-table") {
        return None;
    }
    let id = id.to_string();
    match req.method.to_ascii_uppercase().as_str() {
        "PUT" => Some(respond(handle_user_edit(state, req, &id))),
        "DELETE" => Some(respond(handle_user_delete(state, &id))),
        _ => None,
    }
}
