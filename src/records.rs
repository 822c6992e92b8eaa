use crate::credentials;
use crate::db;
use crate::model::Role;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub admission_number: String,
    pub phone_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub class: Option<String>,
    pub campus: String,
    pub table_number: i64,
    pub is_present: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const STUDENT_COLS: &str = "id, admission_number, phone_number, first_name, last_name, class, campus,
     table_number, is_present, created_at, updated_at";

impl StudentRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            admission_number: r.get(1)?,
            phone_number: r.get(2)?,
            first_name: r.get(3)?,
            last_name: r.get(4)?,
            class: r.get(5)?,
            campus: r.get(6)?,
            table_number: r.get(7)?,
            is_present: r.get::<_, i64>(8)? != 0,
            created_at: r.get(9)?,
            updated_at: r.get(10)?,
        })
    }

    pub fn full_name(&self) -> String {
        crate::model::join_name(&self.first_name, &self.last_name)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "_id": self.id,
            "admissionNumber": self.admission_number,
            "phoneNumber": self.phone_number,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "class": self.class,
            "campus": self.campus,
            "tableNumber": self.table_number,
            "isPresent": self.is_present,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub admission_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: String,
    pub class: Option<String>,
    pub campus: Option<String>,
    pub table_number: Option<i64>,
    pub is_sick: bool,
    pub sick_reason: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const USER_COLS: &str = "id, admission_number, full_name, email, password_hash, role, class, campus,
     table_number, is_sick, sick_reason, created_at, updated_at";

impl UserRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            admission_number: r.get(1)?,
            full_name: r.get(2)?,
            email: r.get(3)?,
            password_hash: r.get(4)?,
            role: r.get(5)?,
            class: r.get(6)?,
            campus: r.get(7)?,
            table_number: r.get(8)?,
            is_sick: r.get::<_, i64>(9)? != 0,
            sick_reason: r.get(10)?,
            created_at: r.get(11)?,
            updated_at: r.get(12)?,
        })
    }

    pub fn is_admin(&self) -> bool {
        Role::parse(&self.role) == Some(Role::Admin)
    }

    /// Public shape; the password hash never leaves the process.
    pub fn to_json(&self) -> Value {
        json!({
            "_id": self.id,
            "admissionNumber": self.admission_number,
            "fullName": self.full_name,
            "email": self.email,
            "role": self.role,
            "class": self.class,
            "campus": self.campus,
            "tableNumber": self.table_number,
            "isSick": self.is_sick,
            "sickReason": self.sick_reason,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

pub fn list_students(conn: &Connection) -> rusqlite::Result<Vec<StudentRow>> {
    let sql = format!(
        "SELECT {} FROM students ORDER BY table_number, last_name, first_name",
        STUDENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], StudentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<StudentRow>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS);
    conn.query_row(&sql, [id], StudentRow::from_row).optional()
}

pub fn student_by_admission(
    conn: &Connection,
    admission_number: &str,
) -> rusqlite::Result<Option<StudentRow>> {
    let sql = format!(
        "SELECT {} FROM students WHERE admission_number = ?",
        STUDENT_COLS
    );
    conn.query_row(&sql, [admission_number], StudentRow::from_row)
        .optional()
}

pub fn list_users(conn: &Connection) -> rusqlite::Result<Vec<UserRow>> {
    let sql = format!("SELECT {} FROM users ORDER BY created_at, id", USER_COLS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], UserRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn user_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLS);
    conn.query_row(&sql, [id], UserRow::from_row).optional()
}

pub fn user_by_admission(
    conn: &Connection,
    admission_number: &str,
) -> rusqlite::Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE admission_number = ?", USER_COLS);
    conn.query_row(&sql, [admission_number], UserRow::from_row)
        .optional()
}

/// `email` must already be lowercased.
pub fn user_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLS);
    conn.query_row(&sql, [email], UserRow::from_row).optional()
}

pub fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    conn.query_row(&sql, [], |r| r.get(0))
}

/// Creates the configured admin account, or restores its role and password if it drifted.
/// Returns true when a new row was inserted.
pub fn ensure_admin_account(conn: &Connection, email: &str, password: &str) -> anyhow::Result<bool> {
    let email = email.trim().to_ascii_lowercase();
    if let Some(existing) = user_by_email(conn, &email)? {
        let password_ok = existing
            .password_hash
            .as_deref()
            .map(|h| credentials::verify_password(password, h))
            .unwrap_or(false);
        if !password_ok || !existing.is_admin() {
            conn.execute(
                "UPDATE users SET role = ?, password_hash = ?, updated_at = ? WHERE id = ?",
                (
                    Role::Admin.as_str(),
                    credentials::hash_password(password),
                    db::now_rfc3339(),
                    &existing.id,
                ),
            )?;
        }
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO users(id, admission_number, full_name, email, password_hash, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            uuid::Uuid::new_v4().to_string(),
            &email,
            "Administrator",
            &email,
            credentials::hash_password(password),
            Role::Admin.as_str(),
            db::now_rfc3339(),
        ),
    )?;
    Ok(true)
}
