use crate::model::{Attendance, Meal, MealStatus};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

pub const DB_FILE: &str = "canteen.sqlite3";

pub fn open_db(data_dir: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let conn = Connection::open(data_dir.join(DB_FILE))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_number TEXT NOT NULL UNIQUE,
            phone_number TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            class TEXT,
            campus TEXT NOT NULL,
            table_number INTEGER NOT NULL,
            is_present INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_table ON students(table_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            admission_number TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            email TEXT UNIQUE,
            password_hash TEXT,
            role TEXT NOT NULL,
            class TEXT,
            campus TEXT,
            table_number INTEGER,
            is_sick INTEGER NOT NULL DEFAULT 0,
            sick_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    // Databases created before accounts carried seating info lack table_number.
    ensure_users_table_number(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meal_attendance(
            admission_number TEXT NOT NULL,
            meal TEXT NOT NULL,
            present INTEGER NOT NULL,
            sick INTEGER NOT NULL DEFAULT 0,
            sick_reason TEXT,
            updated_at TEXT,
            PRIMARY KEY(admission_number, meal)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS otp_verifications(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            otp TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_otp_email ON otp_verifications(email)",
        [],
    )?;

    Ok(())
}

fn ensure_users_table_number(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "table_number")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN table_number INTEGER", [])?;
    // Backfill from the roster where the link exists.
    conn.execute(
        "UPDATE users SET table_number = (
           SELECT s.table_number FROM students s
           WHERE s.admission_number = users.admission_number
         )",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn ms_to_rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    // A row that no longer parses is treated as absent so defaults apply.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn load_attendance(conn: &Connection, admission_number: &str) -> rusqlite::Result<Attendance> {
    let mut stmt = conn.prepare(
        "SELECT meal, present, sick, sick_reason
         FROM meal_attendance
         WHERE admission_number = ?",
    )?;
    let rows = stmt
        .query_map([admission_number], meal_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut attendance = Attendance::all_present();
    for (meal, status) in rows {
        if let Some(meal) = meal {
            attendance.set(meal, status);
        }
    }
    Ok(attendance)
}

pub fn load_all_attendance(conn: &Connection) -> rusqlite::Result<HashMap<String, Attendance>> {
    let mut stmt = conn.prepare(
        "SELECT admission_number, meal, present, sick, sick_reason FROM meal_attendance",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let adm: String = r.get(0)?;
            let meal: String = r.get(1)?;
            Ok((
                adm,
                Meal::parse(&meal),
                MealStatus {
                    present: r.get::<_, i64>(2)? != 0,
                    sick: r.get::<_, i64>(3)? != 0,
                    sick_reason: r.get(4)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut by_admission: HashMap<String, Attendance> = HashMap::new();
    for (adm, meal, status) in rows {
        let Some(meal) = meal else { continue };
        by_admission
            .entry(adm)
            .or_insert_with(Attendance::all_present)
            .set(meal, status);
    }
    Ok(by_admission)
}

fn meal_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(Option<Meal>, MealStatus)> {
    let meal: String = r.get(0)?;
    Ok((
        Meal::parse(&meal),
        MealStatus {
            present: r.get::<_, i64>(1)? != 0,
            sick: r.get::<_, i64>(2)? != 0,
            sick_reason: r.get(3)?,
        },
    ))
}

pub fn save_attendance(
    conn: &Connection,
    admission_number: &str,
    attendance: &Attendance,
) -> rusqlite::Result<()> {
    let now = now_rfc3339();
    for (meal, status) in attendance.iter() {
        conn.execute(
            "INSERT INTO meal_attendance(admission_number, meal, present, sick, sick_reason, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(admission_number, meal) DO UPDATE SET
               present = excluded.present,
               sick = excluded.sick,
               sick_reason = excluded.sick_reason,
               updated_at = excluded.updated_at",
            (
                admission_number,
                meal.key(),
                status.present as i64,
                status.sick as i64,
                status.sick_reason.as_deref(),
                &now,
            ),
        )?;
    }
    Ok(())
}

pub fn rekey_attendance(conn: &Connection, old: &str, new: &str) -> rusqlite::Result<()> {
    if old == new {
        return Ok(());
    }
    conn.execute(
        "DELETE FROM meal_attendance WHERE admission_number = ?",
        [new],
    )?;
    conn.execute(
        "UPDATE meal_attendance SET admission_number = ? WHERE admission_number = ?",
        (new, old),
    )?;
    Ok(())
}

pub fn delete_attendance(conn: &Connection, admission_number: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM meal_attendance WHERE admission_number = ?",
        [admission_number],
    )?;
    Ok(())
}
