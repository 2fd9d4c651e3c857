//! Child processes serving and hosting the web UI.

use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::Context;
use jellyplayer_bridge::config::UiConfig;
use tokio::process::{Child, Command};

/// How long a child gets to exit after being killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Web UI server and web view host, whichever are configured.
#[derive(Debug, Default)]
pub struct UiProcesses {
    server: Option<Child>,
    host: Option<Child>,
}

impl UiProcesses {
    /// Starts the configured processes. The server comes first, so the host
    /// finds the UI already being served.
    pub fn spawn(config: &UiConfig, bridge_addr: SocketAddr) -> anyhow::Result<Self> {
        let mut processes = Self::default();

        if let Some(argv) = &config.server_command {
            let child = command(argv)?
                .spawn()
                .with_context(|| format!("failed to start web UI server {:?}", argv[0]))?;
            log::info!("Started web UI server {:?} (pid {:?})", argv[0], child.id());
            processes.server = Some(child);
        }

        if let Some(argv) = &config.host_command {
            let mut command = command(argv)?;
            command.env("JELLYPLAYER_BRIDGE_URL", format!("http://{bridge_addr}"));
            if let Some(url) = &config.url {
                command.env("JELLYPLAYER_UI_URL", url);
            }
            let child = command
                .spawn()
                .with_context(|| format!("failed to start web view host {:?}", argv[0]))?;
            log::info!("Started web view host {:?} (pid {:?})", argv[0], child.id());
            processes.host = Some(child);
        }

        Ok(processes)
    }

    /// Resolves when the web view host exits. Never resolves without a host.
    pub async fn host_exited(&mut self) -> std::io::Result<ExitStatus> {
        match self.host.as_mut() {
            Some(host) => {
                let status = host.wait().await;
                self.host = None;
                status
            }
            None => std::future::pending().await,
        }
    }

    /// Kills whatever is still running.
    pub async fn shutdown(mut self) {
        for (name, child) in [("web view host", self.host.take()), ("web UI server", self.server.take())] {
            if let Some(child) = child {
                stop(name, child).await;
            }
        }
    }
}

fn command(argv: &[String]) -> anyhow::Result<Command> {
    let (program, args) = argv
        .split_first()
        .context("UI command must name a program")?;
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    Ok(command)
}

async fn stop(name: &str, mut child: Child) {
    if let Ok(Some(status)) = child.try_wait() {
        log::debug!("{name} already exited with {status}");
        return;
    }
    if let Err(e) = child.start_kill() {
        log::warn!("Failed to kill {name}: {e}");
        return;
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => log::debug!("{name} stopped with {status}"),
        Ok(Err(e)) => log::warn!("Failed to reap {name}: {e}"),
        Err(_) => log::warn!("{name} did not exit after being killed"),
    }
}
