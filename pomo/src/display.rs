//! Status-line renderers
//!
//! Each renderer turns one [`StatusPayload`] into one complete line. Frames
//! are pure: no I/O and no state carried between calls, so the attach loop
//! can ask for one on every tick.

use pomo_ipc::{DisplayMode, StatusPayload};
use thiserror::Error;
use tracing::debug;

pub const BAR_WIDTH: usize = 30;
pub const DEFAULT_DOT_INTERVAL_S: u64 = 60;

const PROGRESS_FILLED: char = '█';
const PROGRESS_EMPTY: char = '░';
const DOT: char = '•';
const SEPARATOR: char = '│';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DisplayError {
    #[error("dot interval must be at least one second")]
    ZeroDotInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renderer {
    Countdown,
    CountUp,
    Bar { width: usize },
    Dots { interval_s: u64 },
}

impl Renderer {
    pub fn new(mode: DisplayMode, dot_interval: Option<u64>) -> Result<Self, DisplayError> {
        Ok(match mode {
            DisplayMode::Countdown => Renderer::Countdown,
            DisplayMode::CountUp => Renderer::CountUp,
            DisplayMode::Bar => Renderer::Bar { width: BAR_WIDTH },
            DisplayMode::Dots => match dot_interval.unwrap_or(DEFAULT_DOT_INTERVAL_S) {
                0 => return Err(DisplayError::ZeroDotInterval),
                interval_s => Renderer::Dots { interval_s },
            },
        })
    }

    /// Every variant overwrites its previous frame rather than scrolling.
    pub fn single_line(&self) -> bool {
        true
    }

    pub fn frame(&self, status: &StatusPayload) -> String {
        let label = &status.phase_label;
        match self {
            Renderer::Countdown => format!("{} ⏳ {}", label, mmss(status.remaining_s)),
            Renderer::CountUp => format!(
                "{} ⏱ {} / {}",
                label,
                mmss(status.elapsed_s.min(status.duration_s)),
                mmss(status.duration_s)
            ),
            Renderer::Bar { width } => {
                let progress = status.progress.clamp(0.0, 1.0);
                let filled = ((progress * *width as f64).round() as usize).min(*width);
                let bar: String = std::iter::repeat(PROGRESS_FILLED)
                    .take(filled)
                    .chain(std::iter::repeat(PROGRESS_EMPTY).take(width - filled))
                    .collect();
                format!("{} [{}] {:>3}%", label, bar, (progress * 100.0).round() as u64)
            }
            Renderer::Dots { interval_s } => {
                let elapsed = status.elapsed_s.min(status.duration_s);
                let dots: String = std::iter::repeat(DOT)
                    .take((elapsed / interval_s) as usize)
                    .collect();
                format!("{} {}{}", label, SEPARATOR, dots)
            }
        }
    }

    pub fn close(self) {
        debug!(renderer = ?self, "renderer closed");
    }
}

/// Format seconds as zero-padded `MM:SS`; minutes keep growing past 59.
pub fn mmss(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
