//!
//! opensprint server binary
//! ------------------------
//! `opensprint [serve] [--port N]` starts the API server (the default).
//! `opensprint disable-user <email>` / `enable-user <email>` flip a user's active flag in the
//! persisted snapshot (requires `DATA_DIR`).

use anyhow::{bail, Context, Result};
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use opensprint::config::Config;
use opensprint::error::set_expose_stack;
use opensprint::storage::SharedStore;

fn parse_port_arg(args: &[String]) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse::<u16>().ok();
        }
        i += 1;
    }
    None
}

fn set_user_active(config: &Config, email: &str, active: bool) -> Result<()> {
    let Some(path) = config.snapshot_path() else {
        bail!("DATA_DIR must be set to administer users");
    };
    // Refused while a server holds the data directory; its next write would undo the change.
    let store = SharedStore::open(&path).with_context(|| format!("While opening {}", path.display()))?;
    let user = store.write(|s| s.set_user_active_by_email(email, active))?;
    info!(target: "admin", user = %user.id, email = %user.email, active, "user updated");
    println!("{} {}", if active { "enabled" } else { "disabled" }, user.email);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::from_env().context("Invalid configuration")?;

    // Init logging: RUST_LOG wins, LOG_LEVEL is the fallback.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if let Some(port) = parse_port_arg(&args) {
        config = config.with_port(port);
    }
    set_expose_stack(config.is_development());

    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "opensprint", "opensprint {}: RUST_LOG='{}', log_level={}", env!("CARGO_PKG_VERSION"), rust_log, config.log_level);

    match args.first().map(String::as_str) {
        None | Some("serve") => opensprint::server::run(config).await,
        Some(flag) if flag.starts_with("--") => opensprint::server::run(config).await,
        Some("disable-user") => match args.get(1) {
            Some(email) => set_user_active(&config, email, false),
            None => bail!("usage: opensprint disable-user <email>"),
        },
        Some("enable-user") => match args.get(1) {
            Some(email) => set_user_active(&config, email, true),
            None => bail!("usage: opensprint enable-user <email>"),
        },
        Some(other) => bail!("unknown command '{other}' (expected serve, disable-user or enable-user)"),
    }
}
