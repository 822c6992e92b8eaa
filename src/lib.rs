pub mod api;
pub mod config;
pub mod credentials;
pub mod db;
pub mod mail;
pub mod model;
pub mod records;
pub mod report;
pub mod server;
pub mod telemetry;

use anyhow::Context;

/// Opens the database under `cfg.data_dir`, ensures the configured admin account and
/// builds the mailer.
pub fn open_state(cfg: config::Cfg) -> anyhow::Result<api::AppState> {
    let conn = db::open_db(&cfg.data_dir)
        .with_context(|| format!("unable to open database in {}", cfg.data_dir.display()))?;
    if let Some((email, password)) = cfg.admin_seed() {
        let created = records::ensure_admin_account(&conn, email, password)
            .context("unable to ensure admin account")?;
        if created {
            tracing::info!(email = %email, "admin account created");
        }
    }
    let mailer = mail::from_config(&cfg.mail);
    Ok(api::AppState {
        db: conn,
        db_path: Some(cfg.data_dir.join(db::DB_FILE)),
        mailer,
        cfg,
    })
}
