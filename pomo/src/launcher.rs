//! Starting a detached daemon and finding the one already running

use crate::config::SessionConfig;
use anyhow::{bail, Context, Result};
use pomo_ipc::{Connection, ConnectionInfo, RuntimeFile, SECRET_ENV};
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long `start` waits for a freshly spawned daemon to advertise itself.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

const STARTUP_POLL: Duration = Duration::from_millis(50);

pub fn new_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The session advertised in the runtime file, if its daemon still accepts
/// connections. A file left behind by a dead daemon is removed.
pub async fn live_session(runtime: &RuntimeFile) -> Result<Option<ConnectionInfo>> {
    let info = match runtime.load() {
        Ok(info) => info,
        Err(e) if matches!(e.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) => {
            warn!("Removing unreadable runtime file: {}", e);
            runtime.remove()?;
            None
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read runtime file {:?}", runtime.path()))
        }
    };
    let Some(info) = info else {
        return Ok(None);
    };
    match Connection::connect(info.port).await {
        Ok(conn) => {
            conn.close().await;
            Ok(Some(info))
        }
        Err(e) => {
            debug!("Removing stale runtime file: {}", e);
            runtime.remove()?;
            Ok(None)
        }
    }
}

/// Arguments for the hidden `daemon` subcommand, fully resolved so the
/// daemon does not depend on the user's config file.
pub fn daemon_args(session: &SessionConfig, linger_secs: u64) -> Vec<String> {
    let mut args = vec![
        "daemon".to_string(),
        "--work".to_string(),
        session.work_minutes.to_string(),
        "--break".to_string(),
        session.break_minutes.to_string(),
        "--iterations".to_string(),
        session.iterations.to_string(),
        "--display".to_string(),
        session.display.to_string(),
        "--linger-secs".to_string(),
        linger_secs.to_string(),
    ];
    if let Some(interval) = session.dot_interval {
        args.push("--dot-interval".to_string());
        args.push(interval.to_string());
    }
    args
}

/// Spawn `pomo daemon` in the background and wait until it has written a
/// runtime file carrying our secret.
pub async fn launch(
    session: &SessionConfig,
    linger_secs: u64,
    secret: &str,
    runtime: &RuntimeFile,
) -> Result<ConnectionInfo> {
    let exe = std::env::current_exe().context("Failed to locate the pomo executable")?;
    let mut command = Command::new(&exe);
    command
        .args(daemon_args(session, linger_secs))
        .env(SECRET_ENV, secret)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // Own process group, so Ctrl+C in the viewer's terminal never reaches it.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to start daemon at {}", exe.display()))?;
    info!(pid = ?child.id(), "daemon spawned");

    tokio::select! {
        info = wait_for_runtime(runtime, secret, STARTUP_TIMEOUT) => {
            info.with_context(|| format!(
                "Daemon did not start within {} seconds (no runtime file at {:?})",
                STARTUP_TIMEOUT.as_secs(),
                runtime.path()
            ))
        }
        status = child.wait() => {
            let status = status.context("Failed to wait for daemon")?;
            bail!("Daemon exited during startup ({})", status)
        }
    }
}

/// Poll the runtime file until it names a daemon holding `secret`.
pub async fn wait_for_runtime(
    runtime: &RuntimeFile,
    secret: &str,
    timeout: Duration,
) -> Option<ConnectionInfo> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match runtime.load() {
            Ok(Some(info)) if info.secret == secret => return Some(info),
            Ok(_) => {}
            // Mid-rename or otherwise unreadable; try again next poll.
            Err(e) => debug!("runtime file not readable yet: {}", e),
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(STARTUP_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use pomo_ipc::DisplayMode;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    fn info(port: u16, secret: &str) -> ConnectionInfo {
        ConnectionInfo {
            port,
            secret: secret.to_string(),
            pid: 1,
            display: DisplayMode::Countdown,
            dot_interval: None,
            started_at: Local::now(),
        }
    }

    #[test]
    fn secrets_are_unique() {
        let a = new_secret();
        assert_eq!(a.len(), 32);
        assert_ne!(a, new_secret());
    }

    #[test]
    fn daemon_args_round_trip_the_session() {
        let session = SessionConfig {
            work_minutes: 50,
            break_minutes: 0,
            iterations: 2,
            display: DisplayMode::Dots,
            dot_interval: Some(30),
        };
        assert_eq!(
            daemon_args(&session, 60).join(" "),
            "daemon --work 50 --break 0 --iterations 2 --display dots \
             --linger-secs 60 --dot-interval 30"
        );
        let args = daemon_args(&SessionConfig::default(), 5);
        assert!(!args.contains(&"--dot-interval".to_string()));
    }

    #[tokio::test]
    async fn no_runtime_file_means_no_session() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeFile::at(dir.path().join("pomo-runtime.json"));
        assert!(live_session(&runtime).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_runtime_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeFile::at(dir.path().join("pomo-runtime.json"));
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            listener.local_addr().unwrap().port()
        };
        runtime.save(&info(port, "old")).unwrap();

        assert!(live_session(&runtime).await.unwrap().is_none());
        assert!(!runtime.path().exists());
    }

    #[tokio::test]
    async fn corrupt_runtime_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeFile::at(dir.path().join("pomo-runtime.json"));
        std::fs::write(runtime.path(), "{\"port\": ").unwrap();

        assert!(live_session(&runtime).await.unwrap().is_none());
        assert!(!runtime.path().exists());
    }

    #[tokio::test]
    async fn listening_daemon_is_live() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeFile::at(dir.path().join("pomo-runtime.json"));
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        runtime.save(&info(port, "s3cret")).unwrap();

        let live = live_session(&runtime).await.unwrap().unwrap();
        assert_eq!(live.port, port);
    }

    #[tokio::test]
    async fn waits_for_the_matching_secret() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeFile::at(dir.path().join("pomo-runtime.json"));
        runtime.save(&info(1, "someone-else")).unwrap();

        let writer = RuntimeFile::at(runtime.path());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            writer.save(&info(4242, "mine")).unwrap();
        });

        let found = wait_for_runtime(&runtime, "mine", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(found.port, 4242);
    }

    #[tokio::test]
    async fn gives_up_after_timeout() {
        let dir = TempDir::new().unwrap();
        let runtime = RuntimeFile::at(dir.path().join("pomo-runtime.json"));
        let found = wait_for_runtime(&runtime, "mine", Duration::from_millis(100)).await;
        assert!(found.is_none());
    }
}
