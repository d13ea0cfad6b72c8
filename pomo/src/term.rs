//! Line output for the viewer, with or without ANSI cursor control

use crossterm::{
    cursor::{MoveDown, MoveUp},
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::{self, IsTerminal, Write};

/// Decide whether stdout understands ANSI control sequences.
pub fn supports_ansi() -> bool {
    detect_ansi(|key| std::env::var(key).ok(), io::stdout().is_terminal())
}

fn detect_ansi(env: impl Fn(&str) -> Option<String>, stdout_is_tty: bool) -> bool {
    if env("POMO_NO_ANSI").is_some() {
        return false;
    }
    if env("POMO_FORCE_ANSI").is_some() || env("FORCE_COLOR").is_some() {
        return true;
    }
    if cfg!(windows) {
        return env("TERM_PROGRAM").is_some_and(|p| p == "vscode" || p == "mintty")
            || env("ANSICON").is_some()
            || env("WT_SESSION").is_some();
    }
    if !stdout_is_tty {
        return false;
    }
    let term = env("TERM").unwrap_or_default().to_lowercase();
    term != "dumb"
        && (term.contains("color")
            || term.starts_with("xterm")
            || term.starts_with("screen")
            || term.starts_with("tmux")
            || term.starts_with("rxvt")
            || term == "linux"
            || term == "alacritty")
}

/// The viewer's output device.
///
/// Under ANSI a phase occupies three lines (header, status, legend) and the
/// cursor is parked at the end of the status line between repaints. Without
/// ANSI everything is appended and no control bytes are ever written.
pub struct Screen<W: Write> {
    out: W,
    ansi: bool,
    parked: bool,
}

impl<W: Write> Screen<W> {
    pub fn new(out: W, ansi: bool) -> Self {
        Self {
            out,
            ansi,
            parked: false,
        }
    }

    pub fn ansi(&self) -> bool {
        self.ansi
    }

    /// Print one full line.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        self.leave_status()?;
        self.write_line(text)?;
        self.out.flush()
    }

    /// Paint the first status line of a phase, then the legend below it,
    /// and park the cursor back on the status line.
    pub fn status_with_legend(&mut self, status: &str, legend: &str) -> io::Result<()> {
        self.leave_status()?;
        if self.ansi {
            queue!(self.out, Clear(ClearType::CurrentLine), Print("\r"), Print(status))?;
            self.write_line("")?;
            queue!(self.out, Print(legend), MoveUp(1))?;
            self.parked = true;
        } else {
            self.write_line(status)?;
            self.write_line(legend)?;
        }
        self.out.flush()
    }

    /// Replace the status line in place (ANSI) or append it (plain).
    pub fn repaint(&mut self, status: &str) -> io::Result<()> {
        if self.ansi && self.parked {
            queue!(self.out, Clear(ClearType::CurrentLine), Print("\r"), Print(status))?;
            self.out.flush()
        } else {
            self.line(status)
        }
    }

    /// Move off the parked status line, below the legend, onto a fresh line.
    pub fn leave_status(&mut self) -> io::Result<()> {
        if self.parked {
            queue!(self.out, MoveDown(1))?;
            self.write_line("")?;
            self.parked = false;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        // Raw key mode disables output post-processing, so ANSI lines
        // carry their own carriage return.
        let end = if self.ansi { "\r\n" } else { "\n" };
        write!(self.out, "{}{}", text, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn detect(vars: &[(&str, &str)], tty: bool) -> bool {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        detect_ansi(|key| vars.get(key).cloned(), tty)
    }

    fn text(screen: Screen<Vec<u8>>) -> String {
        String::from_utf8(screen.into_inner()).unwrap()
    }

    #[test]
    fn overrides_win() {
        assert!(!detect(&[("POMO_NO_ANSI", "1"), ("FORCE_COLOR", "1")], true));
        assert!(detect(&[("POMO_FORCE_ANSI", "1")], false));
        assert!(detect(&[("FORCE_COLOR", "1")], false));
    }

    #[cfg(unix)]
    #[test]
    fn needs_a_capable_tty() {
        assert!(detect(&[("TERM", "xterm-256color")], true));
        assert!(detect(&[("TERM", "tmux-256color")], true));
        assert!(!detect(&[("TERM", "xterm-256color")], false));
        assert!(!detect(&[("TERM", "dumb")], true));
        assert!(!detect(&[], true));
    }

    #[test]
    fn plain_output_never_contains_escapes() {
        let mut screen = Screen::new(Vec::new(), false);
        screen.line("[1/1] Focus phase begins").unwrap();
        screen.status_with_legend("⏳ 01:00", "legend").unwrap();
        screen.repaint("⏳ 00:59").unwrap();
        screen.leave_status().unwrap();
        let out = text(screen);
        assert_eq!(out, "[1/1] Focus phase begins\n⏳ 01:00\nlegend\n⏳ 00:59\n");
        assert!(!out.contains('\x1b'));
        assert!(!out.contains('\r'));
    }

    #[test]
    fn ansi_parks_on_status_line() {
        let mut screen = Screen::new(Vec::new(), true);
        screen.status_with_legend("A", "legend").unwrap();
        screen.repaint("B").unwrap();
        screen.leave_status().unwrap();
        assert_eq!(
            text(screen),
            "\x1b[2K\rA\r\nlegend\x1b[1A\x1b[2K\rB\x1b[1B\r\n"
        );
    }

    #[test]
    fn line_after_parking_moves_below_legend_first() {
        let mut screen = Screen::new(Vec::new(), true);
        screen.status_with_legend("A", "legend").unwrap();
        screen.line("[detached] Viewer exited").unwrap();
        let out = text(screen);
        assert!(out.ends_with("legend\x1b[1A\x1b[1B\r\n[detached] Viewer exited\r\n"));
    }
}
