//! Single-key hotkeys read from the terminal without blocking

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, IsTerminal};
use std::time::Duration;
use tracing::warn;

pub const LEGEND: &str = "Hotkeys: Ctrl+C abort • Ctrl+E end phase • Ctrl+O detach";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    None,
    EndPhase,
    Abort,
    ToggleHide,
    Other,
}

impl From<KeyEvent> for Hotkey {
    fn from(key: KeyEvent) -> Self {
        if key.kind == KeyEventKind::Release {
            return Hotkey::None;
        }
        if !key.modifiers.contains(KeyModifiers::CONTROL) {
            return Hotkey::Other;
        }
        match key.code {
            KeyCode::Char('c') | KeyCode::Char('C') => Hotkey::Abort,
            KeyCode::Char('e') | KeyCode::Char('E') => Hotkey::EndPhase,
            KeyCode::Char('o') | KeyCode::Char('O') => Hotkey::ToggleHide,
            _ => Hotkey::Other,
        }
    }
}

/// Where the attach loop gets hotkeys from; polled once per tick.
pub trait HotkeySource {
    /// Must return immediately, with [`Hotkey::None`] when nothing was pressed.
    fn poll(&mut self) -> Hotkey;
}

/// Raw-mode keyboard on the controlling terminal.
///
/// Raw mode is entered on construction and restored on drop, so every exit
/// path out of the attach loop (including unwinding) puts the terminal back.
pub struct TerminalKeys {
    _priv: (),
}

impl TerminalKeys {
    pub fn acquire() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { _priv: () })
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

impl HotkeySource for TerminalKeys {
    fn poll(&mut self) -> Hotkey {
        match event::poll(Duration::ZERO) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => Hotkey::from(key),
                Ok(_) => Hotkey::Other,
                Err(e) => {
                    warn!("Failed to read key: {}", e);
                    Hotkey::None
                }
            },
            Ok(false) => Hotkey::None,
            Err(e) => {
                warn!("Failed to poll keyboard: {}", e);
                Hotkey::None
            }
        }
    }
}

/// Used when stdin is not a terminal: nothing is ever pressed.
pub struct NoKeys;

impl HotkeySource for NoKeys {
    fn poll(&mut self) -> Hotkey {
        Hotkey::None
    }
}

/// Raw-mode keys when stdin is a terminal, otherwise [`NoKeys`].
pub fn open() -> Box<dyn HotkeySource> {
    if !io::stdin().is_terminal() {
        return Box::new(NoKeys);
    }
    match TerminalKeys::acquire() {
        Ok(keys) => Box::new(keys),
        Err(e) => {
            warn!("Hotkeys unavailable, raw mode failed: {}", e);
            Box::new(NoKeys)
        }
    }
}

impl<T: HotkeySource + ?Sized> HotkeySource for Box<T> {
    fn poll(&mut self) -> Hotkey {
        (**self).poll()
    }
}
