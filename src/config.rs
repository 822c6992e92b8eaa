/*!
Runtime configuration: defaults, then an optional TOML file, then
`CANTEEN_*` environment variables, then command-line overrides.
*/
use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    bind: Option<String>,
    data_dir: Option<PathBuf>,
    log_json: Option<bool>,
    admin_email: Option<String>,
    admin_password: Option<String>,
    mail_mode: Option<String>,
    mail_from: Option<String>,
    otp_ttl_secs: Option<i64>,
    passkey_ttl_secs: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailMode {
    Log,
    Disabled,
}

impl MailMode {
    fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(MailMode::Log),
            "disabled" | "off" => Ok(MailMode::Disabled),
            other => Err(anyhow!("unknown mail mode {:?} (expected log or disabled)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailCfg {
    pub mode: MailMode,
    pub from: String,
}

#[derive(Clone)]
pub struct Cfg {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    pub log_json: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub mail: MailCfg,
    pub otp_ttl_secs: i64,
    pub passkey_ttl_secs: i64,
}

// Hand-written so the admin password never reaches the log.
impl std::fmt::Debug for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cfg")
            .field("addr", &self.addr)
            .field("data_dir", &self.data_dir)
            .field("log_json", &self.log_json)
            .field("admin_email", &self.admin_email)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "<redacted>"),
            )
            .field("mail", &self.mail)
            .field("otp_ttl_secs", &self.otp_ttl_secs)
            .field("passkey_ttl_secs", &self.passkey_ttl_secs)
            .finish()
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("data"),
            log_json: false,
            admin_email: None,
            admin_password: None,
            mail: MailCfg {
                mode: MailMode::Log,
                from: "Canteen Tracker <noreply@canteen.local>".to_string(),
            },
            otp_ttl_secs: 10 * 60,
            passkey_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let cf: ConfigFile = toml::from_str(&contents)
            .with_context(|| format!("unable to parse config file {}", path.display()))?;
        let mut c = Self::default();
        c.apply_file(cf)?;
        Ok(c)
    }

    fn apply_file(&mut self, cf: ConfigFile) -> anyhow::Result<()> {
        if let Some(s) = cf.bind {
            self.addr = parse_addr(&s)?;
        }
        if let Some(p) = cf.data_dir {
            self.data_dir = p;
        }
        if let Some(b) = cf.log_json {
            self.log_json = b;
        }
        if let Some(s) = cf.admin_email {
            self.admin_email = Some(s);
        }
        if let Some(s) = cf.admin_password {
            self.admin_password = Some(s);
        }
        if let Some(s) = cf.mail_mode {
            self.mail.mode = MailMode::parse(&s)?;
        }
        if let Some(s) = cf.mail_from {
            self.mail.from = s;
        }
        if let Some(n) = cf.otp_ttl_secs {
            self.otp_ttl_secs = positive_secs("otp_ttl_secs", n)?;
        }
        if let Some(n) = cf.passkey_ttl_secs {
            self.passkey_ttl_secs = positive_secs("passkey_ttl_secs", n)?;
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        if let Some(s) = get("CANTEEN_BIND") {
            self.addr = parse_addr(&s)?;
        }
        if let Some(s) = get("CANTEEN_DATA_DIR") {
            self.data_dir = PathBuf::from(s);
        }
        if let Some(s) = get("CANTEEN_LOG_JSON") {
            self.log_json = parse_bool("CANTEEN_LOG_JSON", &s)?;
        }
        if let Some(s) = get("CANTEEN_ADMIN_EMAIL") {
            self.admin_email = Some(s);
        }
        if let Some(s) = get("CANTEEN_ADMIN_PASSWORD") {
            self.admin_password = Some(s);
        }
        if let Some(s) = get("CANTEEN_MAIL_MODE") {
            self.mail.mode = MailMode::parse(&s)?;
        }
        if let Some(s) = get("CANTEEN_MAIL_FROM") {
            self.mail.from = s;
        }
        if let Some(s) = get("CANTEEN_OTP_TTL_SECS") {
            self.otp_ttl_secs = positive_secs("CANTEEN_OTP_TTL_SECS", parse_i64("CANTEEN_OTP_TTL_SECS", &s)?)?;
        }
        if let Some(s) = get("CANTEEN_PASSKEY_TTL_SECS") {
            self.passkey_ttl_secs =
                positive_secs("CANTEEN_PASSKEY_TTL_SECS", parse_i64("CANTEEN_PASSKEY_TTL_SECS", &s)?)?;
        }
        Ok(())
    }

    pub fn set_bind(&mut self, s: &str) -> anyhow::Result<()> {
        self.addr = parse_addr(s)?;
        Ok(())
    }

    /// Both halves must be present for the startup admin account to be ensured.
    pub fn admin_seed(&self) -> Option<(&str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(e), Some(p)) => Some((e.as_str(), p.as_str())),
            _ => None,
        }
    }
}

fn parse_addr(s: &str) -> anyhow::Result<SocketAddr> {
    s.trim()
        .parse()
        .with_context(|| format!("error parsing {:?} as socket address", s))
}

fn parse_bool(name: &str, s: &str) -> anyhow::Result<bool> {
    match s.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Ok(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got {:?}", name, other)),
    }
}

fn parse_i64(name: &str, s: &str) -> anyhow::Result<i64> {
    s.trim()
        .parse::<i64>()
        .with_context(|| format!("{} must be an integer", name))
}

fn positive_secs(name: &str, n: i64) -> anyhow::Result<i64> {
    if n <= 0 {
        return Err(anyhow!("{} must be positive", name));
    }
    Ok(n)
}
