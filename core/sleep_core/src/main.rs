mod api;
mod auth;
mod csv_io;
mod cycles;
mod db;
mod entry;
mod error;
mod settings;
mod weekly;

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use clap::Parser;
use rusqlite::Connection;
use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    api::AppState,
    auth::TokenAuth,
    settings::{validate_goal, UserSettings, DEFAULT_GOAL_HOURS},
};

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "sleep_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    /// - localhost[:port]
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/sleep-core.db")]
    db: PathBuf,

    /// Secret used to sign and verify bearer tokens.
    #[arg(long, env = "SLEEP_CORE_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Nightly sleep goal (hours) for users who have not saved their own.
    #[arg(long, default_value_t = DEFAULT_GOAL_HOURS)]
    default_goal_hours: f64,

    /// Print a bearer token for USER and exit.
    #[arg(long, value_name = "USER")]
    issue_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sleep_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let Some(secret) = args.token_secret.filter(|s| !s.is_empty()) else {
        anyhow::bail!("missing token secret: pass --token-secret or set SLEEP_CORE_TOKEN_SECRET");
    };
    let auth = TokenAuth::new(SecretString::from(secret));

    if let Some(user) = args.issue_token.as_deref() {
        println!("{}", auth.issue(user)?);
        return Ok(());
    }

    let goal = validate_goal(args.default_goal_hours).map_err(|e| {
        anyhow::anyhow!(
            "invalid --default-goal-hours {}: {e}",
            args.default_goal_hours
        )
    })?;

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&args.db)?;
    db::init_db(&conn)?;

    let state = AppState {
        conn: Arc::new(Mutex::new(conn)),
        auth: Arc::new(auth),
        defaults: Arc::new(UserSettings::with_goal(goal)),
    };
    let app = api::router(state);

    let addr = parse_listen(&args.listen)?;
    info!("Sleep core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        let ip = if host == "localhost" {
            Some(IpAddr::from([127, 0, 0, 1]))
        } else {
            // IPv6 without brackets, e.g. ::1:17700
            host.parse::<IpAddr>().ok()
        };
        if let Some(ip) = ip {
            let port: u16 = port_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid --listen '{input}': bad port. Example: 127.0.0.1:{DEFAULT_PORT}"
                )
            })?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{input}'. Use ip:port (e.g. 127.0.0.1:{DEFAULT_PORT}) or ip (e.g. 127.0.0.1)."
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_variants() {
        assert_eq!(
            parse_listen("0.0.0.0:9000").unwrap(),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_listen("127.0.0.1").unwrap().port(), DEFAULT_PORT);
        assert_eq!(
            parse_listen("localhost").unwrap(),
            SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT)
        );
        assert_eq!(parse_listen("localhost:8080").unwrap().port(), 8080);
        assert!(parse_listen("localhost:http").is_err());
        assert!(parse_listen("example.com:80").is_err());
    }

    #[test]
    fn args_read_secret_and_goal() {
        let args = Args::try_parse_from([
            "sleep_core",
            "--token-secret",
            "s3",
            "--default-goal-hours",
            "7.5",
        ])
        .unwrap();
        assert_eq!(args.token_secret.as_deref(), Some("s3"));
        assert_eq!(args.default_goal_hours, 7.5);
        assert_eq!(args.listen, "127.0.0.1:17700");
        assert!(args.issue_token.is_none());
    }
}
