use crate::api::error::{db_err, db_err_table, respond, respond_created, HandlerErr, Reply};
use crate::api::helpers::{get_optional_bool, get_optional_i64, get_optional_str, get_required_str};
use crate::api::types::{AppState, Request};
use crate::db;
use crate::model::{parse_class, Campus};
use crate::records::{self, StudentRow};
use serde_json::{json, Map, Value};

/// Validated roster fields. Staff campuses are keyed by phone number and carry no class.
#[derive(Debug)]
struct StudentInput {
    admission_number: String,
    phone_number: Option<String>,
    first_name: String,
    last_name: String,
    class: Option<&'static str>,
    campus: Campus,
    table_number: i64,
}

fn validate_student(params: &Value) -> Result<StudentInput, HandlerErr> {
    let first_name = get_optional_str(params, "firstName")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("First name is required"))?;
    let last_name = get_optional_str(params, "lastName")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("Last name is required"))?;

    let campus = match get_optional_str(params, "campus")?.filter(|s| !s.is_empty()) {
        None => Campus::default(),
        Some(s) => Campus::parse(&s)
            .ok_or_else(|| HandlerErr::bad_params(format!("Unknown campus: {}", s)))?,
    };

    let table_number = match get_optional_i64(params, "tableNumber") {
        Ok(Some(n)) if n >= 1 => n,
        _ => return Err(HandlerErr::bad_params("Valid table number is required")),
    };

    let phone_number = get_optional_str(params, "phoneNumber")?.filter(|s| !s.is_empty());
    let admission = get_optional_str(params, "admissionNumber")?.filter(|s| !s.is_empty());

    if campus.is_staff() {
        let Some(phone) = phone_number.clone().or_else(|| admission.clone()) else {
            return Err(HandlerErr::bad_params("Phone number is required for staff"));
        };
        return Ok(StudentInput {
            admission_number: admission.unwrap_or_else(|| phone.clone()),
            phone_number: Some(phone),
            first_name,
            last_name,
            class: None,
            campus,
            table_number,
        });
    }

    let admission_number =
        admission.ok_or_else(|| HandlerErr::bad_params("Admission number is required"))?;
    let class = get_optional_str(params, "class")?
        .as_deref()
        .and_then(parse_class)
        .ok_or_else(|| HandlerErr::bad_params("Valid class is required"))?;
    Ok(StudentInput {
        admission_number,
        phone_number,
        first_name,
        last_name,
        class: Some(class),
        campus,
        table_number,
    })
}

fn handle_students_list(state: &mut AppState) -> Result<Value, HandlerErr> {
    let rows = records::list_students(&state.db).map_err(db_err("db_query_failed"))?;
    Ok(Value::Array(rows.iter().map(StudentRow::to_json).collect()))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let input = validate_student(&req.params)?;
    let conn = &state.db;

    if records::student_by_admission(conn, &input.admission_number)
        .map_err(db_err("db_query_failed"))?
        .is_some()
    {
        return Err(HandlerErr::new("duplicate", "Admission number already exists"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, admission_number, phone_number, first_name, last_name, class,
                              campus, table_number, is_present, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &input.admission_number,
            input.phone_number.as_deref(),
            &input.first_name,
            &input.last_name,
            input.class,
            input.campus.name(),
            input.table_number,
            db::now_rfc3339(),
        ),
    )
    .map_err(db_err_table("db_insert_failed", "students"))?;

    let created = records::student_by_id(conn, &id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("internal", "student vanished after insert"))?;
    tracing::info!(admission_number = %created.admission_number, "student added");
    Ok(created.to_json())
}

/// Overlays the request's roster fields onto the stored row so validation sees the full record.
fn merged_fields(current: &StudentRow, params: &Value) -> Value {
    let mut merged = Map::new();
    merged.insert("firstName".into(), json!(current.first_name));
    merged.insert("lastName".into(), json!(current.last_name));
    merged.insert("admissionNumber".into(), json!(current.admission_number));
    merged.insert("phoneNumber".into(), json!(current.phone_number));
    merged.insert("class".into(), json!(current.class));
    merged.insert("campus".into(), json!(current.campus));
    merged.insert("tableNumber".into(), json!(current.table_number));
    for key in [
        "firstName",
        "lastName",
        "admissionNumber",
        "phoneNumber",
        "class",
        "campus",
        "tableNumber",
    ] {
        if let Some(v) = params.get(key) {
            merged.insert(key.to_string(), v.clone());
        }
    }
    Value::Object(merged)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = get_required_str(&req.params, "_id")?;
    let conn = &state.db;
    let current = records::student_by_id(conn, &id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("Student not found"))?;

    let input = validate_student(&merged_fields(&current, &req.params))?;
    let is_present = get_optional_bool(&req.params, "isPresent")?.unwrap_or(current.is_present);
    let old_admission = current.admission_number.clone();
    let rekeyed = input.admission_number != old_admission;

    if rekeyed {
        let taken_by_student = records::student_by_admission(conn, &input.admission_number)
            .map_err(db_err("db_query_failed"))?
            .is_some();
        let taken_by_user = records::user_by_admission(conn, &input.admission_number)
            .map_err(db_err("db_query_failed"))?
            .is_some();
        if taken_by_student || taken_by_user {
            return Err(HandlerErr::new("duplicate", "Admission number already exists"));
        }
    }

    let now = db::now_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "UPDATE students
         SET admission_number = ?, phone_number = ?, first_name = ?, last_name = ?, class = ?,
             campus = ?, table_number = ?, is_present = ?, updated_at = ?
         WHERE id = ?",
        (
            &input.admission_number,
            input.phone_number.as_deref(),
            &input.first_name,
            &input.last_name,
            input.class,
            input.campus.name(),
            input.table_number,
            is_present as i64,
            &now,
            &id,
        ),
    )
    .map_err(db_err_table("db_update_failed", "students"))?;
    tx.execute(
        "UPDATE users
         SET admission_number = ?, class = ?, campus = ?, table_number = ?, updated_at = ?
         WHERE admission_number = ? AND role != 'admin'",
        (
            &input.admission_number,
            input.class,
            input.campus.name(),
            input.table_number,
            &now,
            &old_admission,
        ),
    )
    .map_err(db_err_table("db_update_failed", "users"))?;
    if rekeyed {
        db::rekey_attendance(&tx, &old_admission, &input.admission_number)
            .map_err(db_err_table("db_update_failed", "meal_attendance"))?;
    }
    tx.commit().map_err(db_err("db_tx_failed"))?;

    let updated = records::student_by_id(conn, &id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("Student not found"))?;
    Ok(json!({ "success": true, "student": updated.to_json() }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = get_optional_str(&req.params, "id")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("Student ID is required"))?;
    let conn = &state.db;
    let student = records::student_by_id(conn, &id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("Student not found"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(db_err_table("db_delete_failed", "students"))?;
    let removed_users = tx
        .execute(
            "DELETE FROM users WHERE admission_number = ? AND role != 'admin'",
            [&student.admission_number],
        )
        .map_err(db_err_table("db_delete_failed", "users"))?;
    db::delete_attendance(&tx, &student.admission_number)
        .map_err(db_err_table("db_delete_failed", "meal_attendance"))?;
    tx.commit().map_err(db_err("db_tx_failed"))?;

    tracing::info!(
        admission_number = %student.admission_number,
        removed_users,
        "student deleted"
    );
    Ok(json!({ "success": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    if req.route_path() != "/api/students" {
        return None;
    }
    let reply = match req.method.to_ascii_uppercase().as_str() {
        "GET" => respond(handle_students_list(state)),
        "POST" => respond_created(handle_students_create(state, req)),
        "PUT" => respond(handle_students_update(state, req)),
        "DELETE" => respond(handle_students_delete(state, req)),
        _ => return None,
    };
    Some(reply)
}
