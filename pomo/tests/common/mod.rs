#![allow(dead_code)]

use pomo::ipc::server;
use pomo::launcher;
use pomo::session::SessionPlan;
use pomo_ipc::{ConnectionInfo, DisplayMode, RuntimeFile};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const SECRET: &str = "integration-secret";

pub fn plan(work: Duration, rest: Duration, iterations: u32, display: DisplayMode) -> SessionPlan {
    SessionPlan {
        work,
        rest,
        iterations,
        display,
        dot_interval: None,
    }
}

/// A daemon serving on a loopback port, advertised through a runtime file
/// in its own temp dir.
pub struct TestDaemon {
    pub info: ConnectionInfo,
    pub runtime: RuntimeFile,
    pub handle: JoinHandle<anyhow::Result<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl TestDaemon {
    pub async fn start(plan: SessionPlan, linger: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pomo-runtime.json");
        let (tx, rx) = oneshot::channel();

        let runtime = RuntimeFile::at(&path);
        let handle = tokio::spawn(async move {
            server::start(plan, SECRET.to_string(), &runtime, linger, async move {
                let _ = rx.await;
            })
            .await
        });

        let runtime = RuntimeFile::at(&path);
        let info = launcher::wait_for_runtime(&runtime, SECRET, Duration::from_secs(2))
            .await
            .expect("daemon never wrote its runtime file");
        Self {
            info,
            runtime,
            handle,
            shutdown: Some(tx),
            _dir: dir,
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
