use super::users::{create_account, user_with_attendance};
use crate::api::error::{db_err, db_err_table, respond, respond_created, HandlerErr, Reply};
use crate::api::helpers::{get_required_str, normalize_email};
use crate::api::types::{AppState, Request};
use crate::credentials;
use crate::db;
use crate::mail;
use crate::model::join_name;
use crate::records::{self, UserRow};
use serde_json::{json, Value};

const BAD_LOGIN: &str = "Invalid admission number or password";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn handle_login(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let login = get_required_str(&req.params, "admissionNumber")?;
    let password = get_required_str(&req.params, "password")?;
    let conn = &state.db;

    let mut user = records::user_by_admission(conn, &login).map_err(db_err("db_query_failed"))?;
    if user.is_none() && login.contains('@') {
        user = records::user_by_email(conn, &normalize_email(&login))
            .map_err(db_err("db_query_failed"))?;
    }
    let Some(user) = user else {
        return Err(HandlerErr::new("unauthorized", BAD_LOGIN));
    };
    let verified = user
        .password_hash
        .as_deref()
        .map(|h| credentials::verify_password(&password, h))
        .unwrap_or(false);
    if !verified {
        return Err(HandlerErr::new("unauthorized", BAD_LOGIN));
    }

    let attendance =
        db::load_attendance(conn, &user.admission_number).map_err(db_err("db_query_failed"))?;
    tracing::info!(admission_number = %user.admission_number, role = %user.role, "login");
    Ok(json!({
        "user": user_with_attendance(&user, &attendance),
        "message": "Login successful"
    }))
}

fn handle_signup(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(&req.params, "firstName")?;
    let last_name = get_required_str(&req.params, "lastName")?;
    let email = normalize_email(&get_required_str(&req.params, "email")?);
    let password = get_required_str(&req.params, "password")?;
    let admission_number = get_required_str(&req.params, "admissionNumber")?;
    let conn = &state.db;

    let by_email = records::user_by_email(conn, &email).map_err(db_err("db_query_failed"))?;
    let by_admission =
        records::user_by_admission(conn, &admission_number).map_err(db_err("db_query_failed"))?;
    if by_email.is_some() || by_admission.is_some() {
        return Err(HandlerErr::new(
            "duplicate",
            "An account with this email or admission number already exists",
        ));
    }
    let Some(student) =
        records::student_by_admission(conn, &admission_number).map_err(db_err("db_query_failed"))?
    else {
        return Err(HandlerErr::bad_params(
            "Student not found with this admission number",
        ));
    };

    let user = create_account(
        conn,
        &student,
        &join_name(&first_name, &last_name),
        &email,
        &password,
    )?;
    Ok(json!({
        "success": true,
        "message": "Account created successfully",
        "user": user.to_json()
    }))
}

fn handle_verify_student(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let admission_number = get_required_str(&req.params, "admissionNumber")?;
    let first_name = get_required_str(&req.params, "firstName")?;
    let last_name = get_required_str(&req.params, "lastName")?;

    let student = records::student_by_admission(&state.db, &admission_number)
        .map_err(db_err("db_query_failed"))?
        .filter(|s| {
            s.first_name.eq_ignore_ascii_case(&first_name)
                && s.last_name.eq_ignore_ascii_case(&last_name)
        })
        .ok_or_else(|| HandlerErr::not_found("Student not found. Please check your details."))?;
    Ok(json!({ "verified": true, "tableNumber": student.table_number }))
}

fn find_by_email(state: &AppState, email: &str) -> Result<UserRow, HandlerErr> {
    records::user_by_email(&state.db, email)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("No account found with this email address"))
}

fn handle_forgot_password(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let email = normalize_email(&get_required_str(&req.params, "email")?);
    let now = db::now_ms();
    let conn = &state.db;

    conn.execute(
        "DELETE FROM otp_verifications WHERE expires_at_ms < ?",
        [now - DAY_MS],
    )
    .map_err(db_err_table("db_delete_failed", "otp_verifications"))?;

    find_by_email(state, &email)?;

    let pending: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM otp_verifications
             WHERE email = ? AND used = 0 AND expires_at_ms > ?",
            (&email, now),
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;
    if pending > 0 {
        return Err(HandlerErr::new(
            "rate_limited",
            "A verification code was already sent. Please wait a few minutes before requesting another one.",
        ));
    }

    let otp = credentials::six_digit_code();
    let id = uuid::Uuid::new_v4().to_string();
    let ttl_secs = state.cfg.otp_ttl_secs;
    conn.execute(
        "INSERT INTO otp_verifications(id, email, otp, expires_at_ms, created_at, used)
         VALUES(?, ?, ?, ?, ?, 0)",
        (&id, &email, &otp, now + ttl_secs * 1000, db::now_rfc3339()),
    )
    .map_err(db_err_table("db_insert_failed", "otp_verifications"))?;

    let message = mail::otp_mail(&email, &otp, (ttl_secs / 60).max(1));
    if let Err(e) = state.mailer.send(&message) {
        tracing::error!(to = %email, error = %e, "verification mail failed");
        // The user never saw this code; drop it so a retry is not rate limited.
        state
            .db
            .execute("DELETE FROM otp_verifications WHERE id = ?", [&id])
            .map_err(db_err_table("db_delete_failed", "otp_verifications"))?;
        return Err(HandlerErr::new(
            "mail_failed",
            "Failed to send verification email",
        ));
    }

    Ok(json!({
        "success": true,
        "message": "Verification code sent successfully"
    }))
}

fn handle_verify_otp(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let email = normalize_email(&get_required_str(&req.params, "email")?);
    let otp = get_required_str(&req.params, "otp")?;
    let changed = state
        .db
        .execute(
            "UPDATE otp_verifications SET used = 1
             WHERE id = (
               SELECT id FROM otp_verifications
               WHERE email = ? AND otp = ? AND used = 0 AND expires_at_ms > ?
               ORDER BY expires_at_ms DESC
               LIMIT 1
             )",
            (&email, &otp, db::now_ms()),
        )
        .map_err(db_err_table("db_update_failed", "otp_verifications"))?;
    if changed == 0 {
        return Err(HandlerErr::new(
            "invalid_otp",
            "Invalid or expired verification code",
        ));
    }
    Ok(json!({ "success": true, "message": "OTP verified successfully" }))
}

fn handle_update_password(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let email = normalize_email(&get_required_str(&req.params, "email")?);
    let password = get_required_str(&req.params, "password")?;
    let changed = state
        .db
        .execute(
            "UPDATE users SET password_hash = ?, updated_at = ? WHERE email = ?",
            (
                credentials::hash_password(&password),
                db::now_rfc3339(),
                &email,
            ),
        )
        .map_err(db_err_table("db_update_failed", "users"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("No user found with this email"));
    }
    tracing::info!(email = %email, "password updated");
    Ok(json!({ "success": true, "message": "Password updated successfully" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    let action = req.route_path().strip_prefix("/api/auth/")?;
    if !req.method.eq_ignore_ascii_case("POST") {
        return None;
    }
    let reply = match action {
        "login" => respond(handle_login(state, req)),
        "signup" => respond_created(handle_signup(state, req)),
        "verify-student" => respond(handle_verify_student(state, req)),
        "forgot-password" => respond(handle_forgot_password(state, req)),
        "verify-otp" => respond(handle_verify_otp(state, req)),
        "update-password" => respond(handle_update_password(state, req)),
        _ => return None,
    };
    Some(reply)
}
