use anyhow::Context;
use canteend::api;
use canteend::config::Cfg;
use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Parser, Debug)]
#[command(name = "canteend", version, about = "Canteen attendance tracker service")]
struct Args {
    /// TOML config file; every field is optional.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8080.
    #[arg(long)]
    bind: Option<String>,

    /// Serve line-delimited JSON requests on stdin/stdout instead of HTTP.
    #[arg(long)]
    stdio: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(p) => Cfg::from_file(p)?,
        None => Cfg::default(),
    };
    cfg.apply_env()?;
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }
    if let Some(bind) = &args.bind {
        cfg.set_bind(bind)?;
    }

    canteend::telemetry::init_tracing(cfg.log_json);
    tracing::info!(?cfg, stdio = args.stdio, "starting canteend");

    let mut state = canteend::open_state(cfg)?;
    if args.stdio {
        run_stdio(&mut state);
        return Ok(());
    }

    let addr = state.cfg.addr;
    let shared = Arc::new(Mutex::new(state));
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("unable to start tokio runtime")?;
    rt.block_on(canteend::server::serve(shared, addr))
}

fn run_stdio(state: &mut api::AppState) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: api::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let _ = writeln!(
                    stdout,
                    "{}",
                    json!({
                        "ok": false,
                        "status": 400,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let id = req.id.clone();
        let reply = api::handle_request(state, req);
        let _ = writeln!(stdout, "{}", api::envelope(&id, &reply));
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
