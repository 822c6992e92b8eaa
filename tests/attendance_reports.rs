use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(data_dir: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_canteend");
    let mut child = Command::new(exe)
        .arg("--stdio")
        .arg("--data-dir")
        .arg(data_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn canteend");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    path: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "path": path,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {} {}", method, path);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    path: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, path, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} {} failed: {}",
        method,
        path,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn seed_roster(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let students = [
        json!({ "firstName": "Amina", "lastName": "Yusuf", "admissionNumber": "1", "tableNumber": 1, "class": "8", "campus": "hifz" }),
        json!({ "firstName": "Bakari", "lastName": "Ali", "admissionNumber": "2", "tableNumber": 1, "class": "P1" }),
        json!({ "firstName": "Chausiku", "lastName": "Omar", "admissionNumber": "3", "tableNumber": 2, "class": "D3", "campus": "ayadi" }),
    ];
    for (i, s) in students.into_iter().enumerate() {
        request_ok(stdin, reader, &format!("seed-{}", i), "POST", "/api/students", s);
    }
    for adm in ["1", "3"] {
        request_ok(
            stdin,
            reader,
            &format!("account-{}", adm),
            "POST",
            "/api/users",
            json!({
                "admissionNumber": adm,
                "fullName": format!("Person {}", adm),
                "email": format!("p{}@example.org", adm),
                "password": "pw"
            }),
        );
    }
    request_ok(
        stdin,
        reader,
        "absent-lunch",
        "PATCH",
        "/api/users/attendance",
        json!({ "admissionNumber": "1", "mealId": "lunch" }),
    );
    request_ok(
        stdin,
        reader,
        "sick",
        "PUT",
        "/api/users/update-sick-status",
        json!({ "admissionNumber": "3", "isSick": true, "sickReason": "flu" }),
    );
}

fn visibility_rows(data_dir: &Path) -> i64 {
    let conn = rusqlite::Connection::open(data_dir.join("canteen.sqlite3")).expect("open db");
    conn.query_row(
        "SELECT COUNT(*) FROM settings WHERE key = 'attendance-visibility'",
        [],
        |r| r.get(0),
    )
    .expect("count visibility rows")
}

#[test]
fn roster_report_counts_sick_people_once_and_lists_every_campus() {
    let data_dir = temp_dir("canteen-attendance-roster");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&data_dir);
    seed_roster(&mut stdin, &mut reader);

    let report = request_ok(&mut stdin, &mut reader, "1", "GET", "/api/attendance", json!({}));
    let lunch = &report["lunch"];
    assert_eq!(lunch["present"], 1);
    assert_eq!(lunch["absent"], 1);
    assert_eq!(lunch["sick"], 1);
    assert_eq!(lunch["presentStudents"][0]["admissionNumber"], "2");
    assert_eq!(lunch["absentStudents"][0]["name"], "Amina Yusuf");
    assert_eq!(lunch["sickStudents"][0]["sickReason"], "flu");

    let totals = lunch["campusTotals"].as_object().expect("campus totals");
    assert_eq!(totals.len(), 5);
    assert_eq!(totals["dawa academy"], 1);
    assert_eq!(totals["hifz"], 0);
    assert_eq!(totals["ayadi"], 0);
    assert_eq!(totals["office stafs"], 0);

    let breakfast = &report["breakfast"];
    assert_eq!(breakfast["present"], 2);
    assert_eq!(breakfast["sick"], 1);
    assert_eq!(breakfast["campusTotals"]["hifz"], 1);

    assert_eq!(report["totalSick"], 1);
    assert_eq!(report["sickStudents"][0]["admissionNumber"], "3");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}

#[test]
fn overview_covers_accounts_only() {
    let data_dir = temp_dir("canteen-attendance-overview");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&data_dir);
    seed_roster(&mut stdin, &mut reader);

    let overview = request_ok(&mut stdin, &mut reader, "1", "GET", "/api/overview", json!({}));
    assert_eq!(overview["grandTotals"]["breakfast"], 1);
    assert_eq!(overview["grandTotals"]["lunch"], 0);
    assert_eq!(overview["totalSick"], 1);
    assert_eq!(overview["sickStudents"][0]["sickReason"], "flu");

    let lunch = &overview["attendanceSummary"]["lunch"];
    assert_eq!(lunch["absent"], 1);
    assert_eq!(lunch["sick"], 1);
    let campuses = lunch["campusTotals"].as_object().expect("campus totals");
    assert_eq!(campuses.len(), 2);
    assert_eq!(campuses["hifz"], 0);
    assert!(campuses.get("dawa academy").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}

#[test]
fn visibility_default_is_stored_once_and_updates_stick() {
    let data_dir = temp_dir("canteen-attendance-visibility");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&data_dir);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "GET",
        "/api/attendance/visibility",
        json!({}),
    );
    assert_eq!(first, json!({ "isHidden": false, "reason": "" }));
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "GET",
        "/api/attendance/visibility",
        json!({}),
    );
    assert_eq!(visibility_rows(&data_dir), 1);

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "PUT",
        "/api/attendance/visibility",
        json!({ "reason": "no flag" }),
    );
    assert_eq!(missing["status"], 400);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "PUT",
        "/api/attendance/visibility",
        json!({ "isHidden": true, "reason": "Exams week" }),
    );
    assert_eq!(updated["success"], true);
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "GET",
        "/api/attendance/visibility",
        json!({}),
    );
    assert_eq!(after["isHidden"], true);
    assert_eq!(after["reason"], "Exams week");
    assert_eq!(visibility_rows(&data_dir), 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}
