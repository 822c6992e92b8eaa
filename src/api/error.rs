use serde_json::{json, Value};

/// Status plus body, independent of the transport that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.status < 400
    }
}

pub fn ok(result: Value) -> Reply {
    Reply {
        status: 200,
        body: result,
    }
}

pub fn created(result: Value) -> Reply {
    Reply {
        status: 201,
        body: result,
    }
}

pub fn err(code: &str, message: impl Into<String>, details: Option<Value>) -> Reply {
    let mut body = json!({
        "error": message.into(),
        "code": code,
    });
    if let Some(d) = details {
        body["details"] = d;
    }
    Reply {
        status: status_for(code),
        body,
    }
}

pub fn status_for(code: &str) -> u16 {
    match code {
        "bad_params" | "bad_json" | "duplicate" | "invalid_otp" | "invalid_state" | "expired" => 400,
        "unauthorized" => 401,
        "forbidden" => 403,
        "not_found" => 404,
        "rate_limited" => 429,
        _ => 500,
    }
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn reply(self) -> Reply {
        err(self.code, self.message, self.details)
    }
}

/// `map_err` adapter for rusqlite failures.
pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

pub fn db_err_table(code: &'static str, table: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string()).with_details(json!({ "table": table }))
}

pub fn respond(result: Result<Value, HandlerErr>) -> Reply {
    match result {
        Ok(v) => ok(v),
        Err(e) => e.reply(),
    }
}

pub fn respond_created(result: Result<Value, HandlerErr>) -> Reply {
    match result {
        Ok(v) => created(v),
        Err(e) => e.reply(),
    }
}

/// Line-protocol envelope used by the stdio transport.
pub fn envelope(id: &str, reply: &Reply) -> Value {
    if reply.is_ok() {
        return json!({
            "id": id,
            "ok": true,
            "status": reply.status,
            "result": reply.body,
        });
    }
    let mut error = json!({
        "code": reply.body.get("code").cloned().unwrap_or_else(|| json!("internal")),
        "message": reply.body.get("error").cloned().unwrap_or_else(|| json!("unknown error")),
    });
    if let Some(d) = reply.body.get("details") {
        error["details"] = d.clone();
    }
    json!({
        "id": id,
        "ok": false,
        "status": reply.status,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_http_statuses() {
        assert_eq!(err("duplicate", "x", None).status, 400);
        assert_eq!(err("unauthorized", "x", None).status, 401);
        assert_eq!(err("forbidden", "x", None).status, 403);
        assert_eq!(err("not_found", "x", None).status, 404);
        assert_eq!(err("rate_limited", "x", None).status, 429);
        assert_eq!(err("db_query_failed", "x", None).status, 500);
    }

    #[test]
    fn error_body_carries_message_and_envelope_unwraps_it() {
        let r = HandlerErr::bad_params("missing email")
            .with_details(json!({ "field": "email" }))
            .reply();
        assert_eq!(r.body["error"], "missing email");
        let env = envelope("7", &r);
        assert_eq!(env["ok"], false);
        assert_eq!(env["status"], 400);
        assert_eq!(env["error"]["code"], "bad_params");
        assert_eq!(env["error"]["details"]["field"], "email");

        let good = envelope("8", &created(json!({ "id": "x" })));
        assert_eq!(good["ok"], true);
        assert_eq!(good["status"], 201);
        assert_eq!(good["result"]["id"], "x");
    }
}
