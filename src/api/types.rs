use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Cfg;
use crate::mail::Mailer;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Route key with any trailing slash dropped, so `/api/users/` and `/api/users` match.
    pub fn route_path(&self) -> &str {
        let p = self.path.as_str();
        if p.len() > 1 {
            p.trim_end_matches('/')
        } else {
            p
        }
    }

    pub fn is(&self, method: &str, path: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.route_path() == path
    }

    /// The single path segment after `prefix`, e.g. the id in `/api/users/{id}`.
    pub fn tail_after<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        let rest = self.route_path().strip_prefix(prefix)?;
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        Some(rest)
    }
}

pub struct AppState {
    pub db: Connection,
    pub db_path: Option<PathBuf>,
    pub cfg: Cfg,
    pub mailer: Box<dyn Mailer>,
}
