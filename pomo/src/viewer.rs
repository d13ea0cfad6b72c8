//! The foreground viewer: attach to the daemon, poll, repaint, react to hotkeys

use crate::display::Renderer;
use crate::keys::{Hotkey, HotkeySource, LEGEND};
use crate::term::Screen;
use pomo_ipc::{Connection, ConnectionInfo, DisplayMode, IpcError, StatusPayload, StatusPoll};
use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, warn};

/// The daemon as the attach loop sees it.
pub trait SessionLink {
    fn status(&mut self) -> impl Future<Output = Result<StatusPoll, IpcError>>;
    fn end_phase(&mut self) -> impl Future<Output = Result<(), IpcError>>;
    fn abort(&mut self) -> impl Future<Output = Result<(), IpcError>>;
}

impl SessionLink for Connection {
    fn status(&mut self) -> impl Future<Output = Result<StatusPoll, IpcError>> {
        Connection::status(self)
    }

    fn end_phase(&mut self) -> impl Future<Output = Result<(), IpcError>> {
        Connection::end_phase(self)
    }

    fn abort(&mut self) -> impl Future<Output = Result<(), IpcError>> {
        Connection::abort(self)
    }
}

#[derive(Debug, Clone)]
pub struct ViewerOptions {
    pub ansi: bool,
    pub poll_interval: Duration,
}

/// Why the attach loop stopped
#[derive(Debug)]
pub enum Exit {
    Finished,
    Detached,
    Aborted,
    Interrupted,
    ConnectionLost(IpcError),
    EndPhaseFailed(IpcError),
    AbortFailed(IpcError),
    OutputClosed(io::Error),
}

impl Exit {
    pub fn message(&self) -> String {
        match self {
            Exit::Finished => "[✓] Session finished".to_string(),
            Exit::Detached => "[detached] Viewer exited".to_string(),
            Exit::Aborted => "[✗] Session aborted".to_string(),
            Exit::Interrupted => "[✓] Viewer interrupted".to_string(),
            Exit::ConnectionLost(e) => format!("Connection to daemon lost: {}", e),
            Exit::EndPhaseFailed(e) => format!("Connection lost while sending end-phase: {}", e),
            Exit::AbortFailed(e) => format!("Connection lost while sending abort: {}", e),
            Exit::OutputClosed(e) => format!("Output closed: {}", e),
        }
    }

    /// Whether a blank line separates the last status line from the message
    /// in plain (non-ANSI) output.
    fn closes_with_blank_line(&self) -> bool {
        matches!(self, Exit::Finished | Exit::Interrupted)
    }
}

/// What decides whether a repaint is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fingerprint {
    Remaining(u64),
    Elapsed(u64),
    /// Progress in thousandths
    Progress(u64),
    Phase(String),
}

impl Fingerprint {
    fn of(status: &StatusPayload) -> Self {
        match status.mode() {
            Some(DisplayMode::Countdown) => Fingerprint::Remaining(status.remaining_s),
            Some(DisplayMode::CountUp) => Fingerprint::Elapsed(status.elapsed_s),
            Some(DisplayMode::Bar | DisplayMode::Dots) => {
                Fingerprint::Progress((status.progress.clamp(0.0, 1.0) * 1000.0).round() as u64)
            }
            None => Fingerprint::Phase(status.phase_id.clone()),
        }
    }
}

/// Per-phase repaint bookkeeping; reset whenever the phase id changes.
#[derive(Debug, Default)]
struct RenderState {
    last_phase_id: Option<String>,
    last_fingerprint: Option<Fingerprint>,
    last_line: Option<String>,
}

impl RenderState {
    fn paint<W: Write>(
        &mut self,
        status: &StatusPayload,
        renderer: &Renderer,
        screen: &mut Screen<W>,
    ) -> io::Result<()> {
        let fingerprint = Fingerprint::of(status);

        if self.last_phase_id.as_deref() != Some(status.phase_id.as_str()) {
            let line = renderer.frame(status);
            screen.line(&format!("{} phase begins", status.phase_label))?;
            screen.status_with_legend(&line, LEGEND)?;
            *self = RenderState {
                last_phase_id: Some(status.phase_id.clone()),
                last_fingerprint: Some(fingerprint),
                last_line: Some(line),
            };
            return Ok(());
        }

        let forced = screen.ansi() && status.mode().is_some_and(|mode| mode.is_coarse());
        if !forced && self.last_fingerprint.as_ref() == Some(&fingerprint) {
            return Ok(());
        }
        self.last_fingerprint = Some(fingerprint);

        let line = renderer.frame(status);
        // A plain log gains nothing from the same line twice.
        if !screen.ansi() && self.last_line.as_deref() == Some(line.as_str()) {
            return Ok(());
        }
        if renderer.single_line() {
            screen.repaint(&line)?;
        } else {
            screen.line(&line)?;
        }
        self.last_line = Some(line);
        Ok(())
    }
}

/// Connect to the daemon described by `info` and run the viewer until the
/// session ends, the user detaches or aborts, or the connection drops.
///
/// Every failure is reported on `out`; nothing is returned to the caller.
/// `open_keys` is only called once the daemon has accepted us, so raw key
/// mode is never entered for a viewer that cannot attach.
pub async fn attach<W, K>(
    info: &ConnectionInfo,
    open_keys: impl FnOnce() -> K,
    out: W,
    options: &ViewerOptions,
    interrupt: impl Future<Output = ()>,
) where
    W: Write,
    K: HotkeySource,
{
    let mut screen = Screen::new(out, options.ansi);

    let mut conn = match Connection::connect(info.port).await {
        Ok(conn) => conn,
        Err(e) => {
            report(
                &mut screen,
                &format!("Unable to connect to session daemon: {}", e),
            );
            return;
        }
    };

    let failure = match conn.hello(&info.secret).await {
        Ok(true) => None,
        Ok(false) => Some("Authentication failed".to_string()),
        Err(e) => Some(format!("Connection lost during authentication: {}", e)),
    };
    if let Some(message) = failure {
        report(&mut screen, &message);
        conn.close().await;
        return;
    }

    let renderer = match Renderer::new(info.display, info.dot_interval) {
        Ok(renderer) => renderer,
        Err(e) => {
            report(&mut screen, &format!("Unable to create UI renderer: {}", e));
            conn.close().await;
            return;
        }
    };

    let mut keys = open_keys();
    let exit = run(
        &mut conn,
        renderer,
        &mut keys,
        &mut screen,
        options.poll_interval,
        interrupt,
    )
    .await;
    // Restore the terminal before the socket goes away.
    drop(keys);
    debug!(?exit, "viewer stopped");
    conn.close().await;
}

/// The poll/render/hotkey loop over an already authenticated link.
///
/// The renderer is always closed and the exit message always printed,
/// whichever way the loop ends.
pub async fn run<L, K, W>(
    link: &mut L,
    renderer: Renderer,
    keys: &mut K,
    screen: &mut Screen<W>,
    poll_interval: Duration,
    interrupt: impl Future<Output = ()>,
) -> Exit
where
    L: SessionLink,
    K: HotkeySource,
    W: Write,
{
    let exit = poll_loop(link, &renderer, keys, screen, poll_interval, interrupt).await;

    let closed = screen.leave_status().and_then(|()| {
        if !screen.ansi() && exit.closes_with_blank_line() {
            screen.line("")?;
        }
        Ok(())
    });
    renderer.close();
    if let Err(e) = closed.and_then(|()| screen.line(&exit.message())) {
        warn!("Failed to print exit message: {}", e);
    }
    exit
}

async fn poll_loop<L, K, W>(
    link: &mut L,
    renderer: &Renderer,
    keys: &mut K,
    screen: &mut Screen<W>,
    poll_interval: Duration,
    interrupt: impl Future<Output = ()>,
) -> Exit
where
    L: SessionLink,
    K: HotkeySource,
    W: Write,
{
    tokio::pin!(interrupt);
    let mut state = RenderState::default();

    loop {
        match link.status().await {
            Ok(StatusPoll::Running(status)) => {
                if let Err(e) = state.paint(&status, renderer, screen) {
                    return Exit::OutputClosed(e);
                }
            }
            Ok(StatusPoll::Ended) => return Exit::Finished,
            Ok(StatusPoll::Unusable) => debug!("No usable status this tick"),
            Err(e) => return Exit::ConnectionLost(e),
        }

        match keys.poll() {
            Hotkey::ToggleHide => return Exit::Detached,
            Hotkey::EndPhase => {
                if let Err(e) = link.end_phase().await {
                    return Exit::EndPhaseFailed(e);
                }
            }
            Hotkey::Abort => {
                return match link.abort().await {
                    Ok(()) => Exit::Aborted,
                    Err(e) => Exit::AbortFailed(e),
                };
            }
            Hotkey::None | Hotkey::Other => {}
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = &mut interrupt => return Exit::Interrupted,
        }
    }
}

fn report<W: Write>(screen: &mut Screen<W>, message: &str) {
    debug!("{}", message);
    if let Err(e) = screen.line(message) {
        warn!("Failed to print diagnostic: {}", e);
    }
}
