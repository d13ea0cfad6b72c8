//! pomo: a terminal Pomodoro timer
//!
//! A detached daemon owns the session state machine and serves it over a
//! loopback socket; the foreground viewer attaches, renders and forwards
//! hotkeys.

pub mod config;
pub mod display;
pub mod ipc;
pub mod keys;
pub mod launcher;
pub mod session;
pub mod term;
pub mod timing;
pub mod viewer;
