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

fn post_message(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject: &str,
) -> String {
    let created = request(
        stdin,
        reader,
        id,
        "POST",
        "/api/messages",
        json!({ "name": "Parent", "email": "Parent@Example.org", "subject": subject, "message": "Hello" }),
    );
    assert_eq!(created["status"], 201, "{}", created);
    assert_eq!(created["result"]["status"], "unread");
    assert_eq!(created["result"]["email"], "parent@example.org");
    created["result"]["_id"].as_str().expect("message id").to_string()
}

#[test]
fn messages_are_listed_newest_first_and_track_status() {
    let data_dir = temp_dir("canteen-messages");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&data_dir);

    let incomplete = request(
        &mut stdin,
        &mut reader,
        "1",
        "POST",
        "/api/messages",
        json!({ "name": "Parent", "email": "p@example.org", "subject": "Menu" }),
    );
    assert_eq!(incomplete["status"], 400);

    let older = post_message(&mut stdin, &mut reader, "2", "Older");
    let newer = post_message(&mut stdin, &mut reader, "3", "Newer");
    let list = request_ok(&mut stdin, &mut reader, "4", "GET", "/api/messages", json!({}));
    let list = list.as_array().expect("array");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["_id"], newer.as_str());
    assert_eq!(list[1]["_id"], older.as_str());
    assert_eq!(list[1]["message"], "Hello");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "PUT",
        "/api/messages",
        json!({ "messageId": older }),
    );
    let flipped = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "PATCH",
        "/api/messages",
        json!({ "id": newer, "status": "READ" }),
    );
    assert_eq!(flipped["status"], "read");
    let bad_status = request(
        &mut stdin,
        &mut reader,
        "7",
        "PATCH",
        "/api/messages",
        json!({ "id": newer, "status": "archived" }),
    );
    assert_eq!(bad_status["status"], 400);
    let list = request_ok(&mut stdin, &mut reader, "8", "GET", "/api/messages", json!({}));
    assert!(list
        .as_array()
        .expect("array")
        .iter()
        .all(|m| m["status"] == "read"));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "9",
        "PUT",
        "/api/messages",
        json!({ "messageId": "missing" }),
    );
    assert_eq!(unknown["status"], 404);
    assert_eq!(unknown["error"]["message"], "Message not found");

    let no_id = request(&mut stdin, &mut reader, "10", "DELETE", "/api/messages", json!({}));
    assert_eq!(no_id["status"], 400);
    assert_eq!(no_id["error"]["message"], "Message ID is required");
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "DELETE",
        "/api/messages",
        json!({ "id": older }),
    );
    let again = request(
        &mut stdin,
        &mut reader,
        "12",
        "DELETE",
        "/api/messages",
        json!({ "id": older }),
    );
    assert_eq!(again["status"], 404);

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "GET",
        "/api/admin/dashboard-stats",
        json!({}),
    );
    assert_eq!(stats["totalMessages"], 1);
    assert_eq!(stats["totalStudents"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}

#[test]
fn settings_merge_validates_and_drops_password_fields() {
    let data_dir = temp_dir("canteen-settings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&data_dir);

    let defaults = request_ok(&mut stdin, &mut reader, "1", "GET", "/api/settings", json!({}));
    assert_eq!(defaults["numberOfTables"], 10);
    assert_eq!(defaults["darkMode"], false);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "PUT",
        "/api/settings",
        json!({
            "darkMode": true,
            "numberOfTables": 24,
            "email": "Office@Canteen.Example",
            "currentPassword": "a",
            "newPassword": "b",
            "confirmPassword": "b"
        }),
    );
    assert_eq!(saved["success"], true);
    assert_eq!(saved["settings"]["email"], "office@canteen.example");
    assert!(saved["settings"].get("newPassword").is_none());

    for (i, bad) in [
        json!({ "numberOfTables": 0 }),
        json!({ "numberOfTables": 201 }),
        json!({ "darkMode": "yes" }),
        json!({ "theme": "blue" }),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "PUT",
            "/api/settings",
            bad,
        );
        assert_eq!(resp["status"], 400, "{}", resp);
    }

    let current = request_ok(&mut stdin, &mut reader, "3", "GET", "/api/settings", json!({}));
    assert_eq!(current["numberOfTables"], 24);
    assert_eq!(current["darkMode"], true);
    assert_eq!(current["allowPublicTableView"], true);

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "GET",
        "/api/admin/dashboard-stats",
        json!({}),
    );
    assert_eq!(stats["totalTables"], 24);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}

#[test]
fn passkey_is_generated_then_readable() {
    let data_dir = temp_dir("canteen-passkey");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&data_dir);

    let none = request(
        &mut stdin,
        &mut reader,
        "1",
        "GET",
        "/api/settings/passkey",
        json!({}),
    );
    assert_eq!(none["status"], 404);
    assert_eq!(none["error"]["message"], "No passkey found");

    let generated = request(
        &mut stdin,
        &mut reader,
        "2",
        "POST",
        "/api/settings/passkey",
        json!({}),
    );
    assert_eq!(generated["status"], 200);
    let passkey = generated["result"]["passkey"]
        .as_str()
        .expect("passkey")
        .to_string();
    assert_eq!(passkey.len(), 6);

    let read = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "GET",
        "/api/settings/passkey",
        json!({}),
    );
    assert_eq!(read["passkey"], passkey.as_str());
    assert_eq!(read["isActive"], true);
    assert_eq!(read["expiresAt"], generated["result"]["expiresAt"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(data_dir);
}
