//! Loopback TCP server for the session daemon

use crate::session::{Session, SessionPlan};
use anyhow::{Context, Result};
use chrono::Local;
use pomo_ipc::{
    deserialize_frame, read_frame, write_frame, ConnectionInfo, IpcError, Reply, Request,
    RuntimeFile,
};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Owns the session and answers requests against it.
///
/// Authentication is per connection, so the flag lives with the caller.
pub struct Daemon {
    session: Session,
    secret: String,
    ended_at: Option<Instant>,
}

impl Daemon {
    pub fn new(session: Session, secret: impl Into<String>) -> Self {
        Self {
            session,
            secret: secret.into(),
            ended_at: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// When the daemon first saw the session in its ended state.
    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    pub fn handle(&mut self, request: Request, authenticated: &mut bool, now: Instant) -> Reply {
        let reply = match request {
            Request::Hello { secret } => {
                *authenticated = secret == self.secret;
                if *authenticated {
                    debug!("viewer authenticated");
                    Reply::ok()
                } else {
                    warn!("viewer sent the wrong secret");
                    Reply::error("authentication failed")
                }
            }
            _ if !*authenticated => Reply::error("not authenticated"),
            Request::Status => match self.session.status(now) {
                Some(payload) => Reply::status(&payload),
                None => Reply::ended(),
            },
            Request::EndPhase => {
                self.session.end_phase(now);
                Reply::ok()
            }
            Request::Abort => {
                self.session.abort(now);
                Reply::ok()
            }
        };
        self.note_ended(now);
        reply
    }

    fn note_ended(&mut self, now: Instant) {
        if self.ended_at.is_none() && self.session.is_ended() {
            self.ended_at = Some(now);
        }
    }
}

/// Bind a loopback port, advertise it in the runtime file and serve until
/// `shutdown` resolves or the ended session has lingered unwatched.
pub async fn start(
    plan: SessionPlan,
    secret: String,
    runtime: &RuntimeFile,
    linger: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("Failed to bind loopback port")?;
    let port = listener.local_addr()?.port();

    let info = ConnectionInfo {
        port,
        secret: secret.clone(),
        pid: std::process::id(),
        display: plan.display,
        dot_interval: plan.dot_interval,
        started_at: Local::now(),
    };
    let daemon = Daemon::new(Session::new(plan, Instant::now()), secret);

    runtime
        .save(&info)
        .with_context(|| format!("Failed to write runtime file {:?}", runtime.path()))?;
    info!("Runtime file written to {:?}", runtime.path());

    let result = serve(listener, daemon, linger, shutdown).await;

    if let Err(e) = runtime.remove() {
        warn!("Failed to remove runtime file: {}", e);
    }
    result
}

/// Accept loop. One connection is served at a time, to completion, before
/// the next is accepted.
pub async fn serve(
    listener: TcpListener,
    mut daemon: Daemon,
    linger: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!("IPC server listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);
    let mut idle_since = Instant::now();

    loop {
        let linger_deadline = daemon
            .ended_at()
            .map(|ended| ended.max(idle_since) + linger);

        let accepted = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = tokio::time::sleep_until(
                linger_deadline.unwrap_or_else(Instant::now).into()
            ), if linger_deadline.is_some() => {
                info!("Session over and no viewer attached, exiting");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        let stream = match accepted {
            Ok((stream, peer)) => {
                info!("Viewer connected from {}", peer);
                stream
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                continue;
            }
        };

        let served = tokio::select! {
            result = handle_client(stream, &mut daemon) => Some(result),
            _ = &mut shutdown => None,
        };
        match served {
            None => {
                info!("Shutdown requested");
                break;
            }
            Some(Ok(())) => info!("Viewer disconnected"),
            Some(Err(e)) => warn!("Dropped viewer connection: {}", e),
        }
        idle_since = Instant::now();
    }

    Ok(())
}

async fn handle_client(stream: TcpStream, daemon: &mut Daemon) -> Result<(), IpcError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::new();
    let mut authenticated = false;

    loop {
        match read_frame(&mut reader, &mut frame).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(IpcError::FrameTooLarge { max }) => {
                let reply = Reply::error(format!("Request frame too large (max {} bytes)", max));
                write_frame(&mut writer, &reply).await?;
                return Err(IpcError::FrameTooLarge { max });
            }
            Err(e) => return Err(e),
        }

        let reply = match deserialize_frame::<Request>(&frame) {
            Ok(request) => {
                debug!(?request, "request");
                daemon.handle(request, &mut authenticated, Instant::now())
            }
            Err(e) => {
                warn!("Malformed request: {}", e);
                Reply::error(format!("malformed request: {}", e))
            }
        };
        write_frame(&mut writer, &reply).await?;
    }
}
