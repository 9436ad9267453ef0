mod cli;

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unpossible_observer::config::{ObserverConfig, strip_worker_flag};
use unpossible_observer::demo;
use unpossible_observer::error::ObserverError;
use unpossible_observer::routes::AppState;
use unpossible_observer::supervisor::Supervisor;

use cli::Cli;

const DEMO_DELAY: Duration = Duration::from_secs(1);
const AUTOSTART_DELAY: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ObserverConfig::resolve(cli.home, cli.port)?;
    let url = config.url();

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to listen on port {}", config.port))?;

    let supervisor = Supervisor::spawn(config.clone());
    let state = AppState::new(config, supervisor.clone());
    info!("Unpossible Observer running at {url}");

    if cli.demo {
        info!("starting in demo mode");
        let demo_supervisor = supervisor.clone();
        after(DEMO_DELAY, async move {
            demo_supervisor.start_demo(demo::LINE_INTERVAL)
        });
    } else if !cli.worker_args.is_empty() {
        let args = strip_worker_flag(cli.worker_args);
        info!("starting Unpossible with args: {}", args.join(" "));
        let start_supervisor = supervisor.clone();
        after(AUTOSTART_DELAY, async move { start_supervisor.start(args) });
    }

    if !cli.no_open {
        open_browser(&url);
    }

    tokio::select! {
        result = unpossible_observer::serve(listener, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping worker");
            supervisor.stop().await?;
        }
    }
    Ok(())
}

/// Run `action` once `delay` has passed, logging a failure.
fn after<F>(delay: Duration, action: F)
where
    F: Future<Output = Result<(), ObserverError>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = action.await {
            warn!(error = %err, "scheduled start failed");
        }
    });
}

/// Open `url` with the platform's default handler.
fn open_browser(url: &str) {
    let mut cmd = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut cmd = std::process::Command::new("cmd");
        cmd.args(["/C", "start", ""]);
        cmd
    } else {
        std::process::Command::new("xdg-open")
    };
    cmd.arg(url)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Err(err) = cmd.spawn() {
        warn!(error = %err, "could not open a browser; visit {url}");
    }
}
