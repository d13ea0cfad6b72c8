//! Inter-process communication between the pomo session daemon and its viewers
//!
//! We use newline-delimited JSON over a loopback TCP socket - four fixed
//! request shapes, one reply per request, no server push.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod client;
pub mod runtime;

pub use client::{Connection, StatusPoll};
pub use runtime::{ConnectionInfo, RuntimeFile};

/// Largest frame either side will accept, newline included.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Environment variable carrying the shared secret from the launcher to the daemon.
pub const SECRET_ENV: &str = "POMO_SECRET";

/// Requests a viewer (or pomoctl) can send to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Hello { secret: String },
    Status,
    EndPhase,
    Abort,
}

/// The `status` field carried by every reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Error,
    Ended,
}

/// How the viewer renders the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayMode {
    /// Remaining time, counting down to 00:00
    #[default]
    Countdown,
    /// Elapsed time, counting up to the phase duration
    CountUp,
    Bar,
    Dots,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 4] = [
        DisplayMode::Countdown,
        DisplayMode::CountUp,
        DisplayMode::Bar,
        DisplayMode::Dots,
    ];

    /// Name used on the wire, in the runtime file and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Countdown => "timer-back",
            DisplayMode::CountUp => "timer-forward",
            DisplayMode::Bar => "bar",
            DisplayMode::Dots => "dots",
        }
    }

    /// Bar and dots redraw every tick under ANSI regardless of fingerprint.
    pub fn is_coarse(&self) -> bool {
        matches!(self, DisplayMode::Bar | DisplayMode::Dots)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisplayMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown display mode '{}' (expected timer-back, timer-forward, bar or dots)",
                    s
                )
            })
    }
}

impl Serialize for DisplayMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DisplayMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Strongly-typed snapshot of the current phase.
///
/// Built by the daemon from a single timing computation and by the viewer
/// from a [`Reply`] via [`StatusPayload::from_reply`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPayload {
    pub phase_id: String,
    pub phase_label: String,
    pub elapsed_s: u64,
    pub remaining_s: u64,
    pub duration_s: u64,
    /// Always within 0.0..=1.0
    pub progress: f64,
    /// Display mode name as sent by the daemon; may be one this build does not know.
    pub display: String,
    pub dot_interval: Option<u64>,
    pub iter: u32,
    pub iters: u32,
    pub done: bool,
}

impl StatusPayload {
    /// The display mode, if the name is one we know.
    pub fn mode(&self) -> Option<DisplayMode> {
        self.display.parse().ok()
    }

    /// Normalise a loosely-typed reply into a payload.
    ///
    /// Accepts the current field names and the legacy `left`/`total`
    /// aliases, derives `elapsed_s` from `duration_s - remaining_s` when it is
    /// missing and recomputes `progress` when absent. Returns `None` when the
    /// reply carries no timing fields at all.
    pub fn from_reply(reply: Reply) -> Option<Self> {
        let duration = reply.duration_s.or(reply.total);
        let remaining = reply.remaining_s.or(reply.left);
        let elapsed = reply.elapsed_s;

        if duration.is_none() && remaining.is_none() && elapsed.is_none() {
            return None;
        }

        let elapsed_s = match (elapsed, duration, remaining) {
            (Some(e), _, _) => e,
            (None, Some(d), Some(r)) => d.saturating_sub(r),
            _ => 0,
        };
        let duration_s = duration.unwrap_or_else(|| elapsed_s + remaining.unwrap_or(0));
        let remaining_s = remaining.unwrap_or_else(|| duration_s.saturating_sub(elapsed_s));
        let progress = match reply.progress {
            Some(p) if p.is_finite() => p.clamp(0.0, 1.0),
            _ if duration_s > 0 => (elapsed_s as f64 / duration_s as f64).clamp(0.0, 1.0),
            _ => 0.0,
        };

        let phase_label = reply.phase_label.unwrap_or_default();
        // Older daemons sent numeric ids or none at all; the label is the next best identity.
        let phase_id = match reply.phase_id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => phase_label.clone(),
            Some(other) => other.to_string(),
        };

        Some(Self {
            phase_id,
            phase_label,
            elapsed_s,
            remaining_s,
            duration_s,
            progress,
            display: reply
                .display
                .unwrap_or_else(|| DisplayMode::default().as_str().to_string()),
            dot_interval: reply.dot_interval,
            iter: reply.iter.unwrap_or(1),
            iters: reply.iters.unwrap_or(1),
            done: reply.done.unwrap_or(false),
        })
    }
}

/// A reply exactly as it appears on the wire.
///
/// Every field is optional so that older daemons and acknowledgement-only
/// replies decode through the same type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReplyStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dot_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iters: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    /// Legacy alias of `remaining_s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<u64>,
    /// Legacy alias of `duration_s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            status: Some(ReplyStatus::Ok),
            ..Self::default()
        }
    }

    pub fn ended() -> Self {
        Self {
            status: Some(ReplyStatus::Ended),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(ReplyStatus::Error),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Full status reply. The legacy aliases are copied from the same
    /// payload fields so they can never drift from the current names.
    pub fn status(payload: &StatusPayload) -> Self {
        Self {
            status: Some(ReplyStatus::Ok),
            message: None,
            phase_id: Some(serde_json::Value::String(payload.phase_id.clone())),
            phase_label: Some(payload.phase_label.clone()),
            elapsed_s: Some(payload.elapsed_s),
            remaining_s: Some(payload.remaining_s),
            duration_s: Some(payload.duration_s),
            progress: Some(payload.progress),
            display: Some(payload.display.clone()),
            dot_interval: payload.dot_interval,
            iter: Some(payload.iter),
            iters: Some(payload.iters),
            done: Some(payload.done),
            left: Some(payload.remaining_s),
            total: Some(payload.duration_s),
        }
    }

    /// A missing `status` field counts as `ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, None | Some(ReplyStatus::Ok))
    }

    pub fn is_ended(&self) -> bool {
        self.status == Some(ReplyStatus::Ended)
    }
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is the pomo daemon running?")]
    ConnectionRefused,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timed out waiting for the daemon to reply")]
    Timeout,

    #[error("Frame too large (max {max} bytes)")]
    FrameTooLarge { max: usize },

    #[error("Daemon rejected request: {0}")]
    Rejected(String),
}

impl IpcError {
    /// Errors that mean the socket is gone, as opposed to one bad frame.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            IpcError::Io(_)
                | IpcError::ConnectionRefused
                | IpcError::ConnectionClosed
                | IpcError::Timeout
        )
    }
}

/// Serialize a message as one JSON line.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize one JSON line (trailing newline optional)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    line: &str,
) -> Result<T, serde_json::Error> {
    deserialize_frame(line.as_bytes())
}

/// Deserialize one raw frame. Bytes that are not valid UTF-8 fail as a
/// JSON error like any other malformed frame.
pub fn deserialize_frame<T: for<'de> Deserialize<'de>>(
    frame: &[u8],
) -> Result<T, serde_json::Error> {
    let mut end = frame.len();
    while end > 0 && matches!(frame[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    serde_json::from_slice(&frame[..end])
}

/// Read one frame, as raw bytes, into `buf`.
///
/// Returns `Ok(false)` on a clean end of stream. A frame longer than
/// [`MAX_FRAME_BYTES`] fails with [`IpcError::FrameTooLarge`]; the stream
/// is then mid-frame and should be dropped. Content is not decoded here,
/// so a frame of garbage bytes still leaves the stream usable.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool, IpcError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    buf.clear();
    let n = (&mut *reader)
        .take(MAX_FRAME_BYTES as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if n == 0 {
        return Ok(false);
    }
    if n > MAX_FRAME_BYTES {
        return Err(IpcError::FrameTooLarge {
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(true)
}

/// Write one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), IpcError>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    use tokio::io::AsyncWriteExt;

    let bytes = serialize_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> StatusPayload {
        StatusPayload {
            phase_id: "2_Focus".into(),
            phase_label: "[2/4] Focus".into(),
            elapsed_s: 35,
            remaining_s: 65,
            duration_s: 100,
            progress: 0.35,
            display: "bar".into(),
            dot_interval: None,
            iter: 2,
            iters: 4,
            done: false,
        }
    }

    #[test]
    fn requests_use_type_tag() {
        let hello = serde_json::to_value(Request::Hello {
            secret: "s3cret".into(),
        })
        .unwrap();
        assert_eq!(hello, json!({"type": "hello", "secret": "s3cret"}));
        assert_eq!(
            serde_json::to_value(Request::EndPhase).unwrap(),
            json!({"type": "end_phase"})
        );

        let parsed: Request = deserialize_message("{\"type\":\"abort\"}\n").unwrap();
        assert_eq!(parsed, Request::Abort);
    }

    #[test]
    fn unknown_request_type_is_an_error() {
        assert!(deserialize_message::<Request>(r#"{"type":"reboot"}"#).is_err());
        assert!(deserialize_message::<Request>(r#"{"type":"hello"}"#).is_err());
        assert!(deserialize_message::<Request>("not json").is_err());
    }

    #[test]
    fn status_reply_mirrors_legacy_aliases() {
        let reply = Reply::status(&payload());
        assert_eq!(reply.left, reply.remaining_s);
        assert_eq!(reply.total, reply.duration_s);

        let wire = serde_json::to_value(&reply).unwrap();
        assert_eq!(wire["status"], "ok");
        assert_eq!(wire["left"], 65);
        assert_eq!(wire["total"], 100);
        assert_eq!(wire["phase_id"], "2_Focus");
        assert!(wire["dot_interval"].is_null());
    }

    #[test]
    fn ended_reply_is_minimal() {
        let wire = String::from_utf8(serialize_message(&Reply::ended()).unwrap()).unwrap();
        assert_eq!(wire, "{\"status\":\"ended\"}\n");
        assert!(deserialize_message::<Reply>(&wire).unwrap().is_ended());
    }

    #[test]
    fn reply_without_status_counts_as_ok() {
        let reply: Reply = deserialize_message(r#"{"left": 10, "total": 60}"#).unwrap();
        assert!(reply.is_ok());
        assert!(!reply.is_ended());
    }

    #[test]
    fn normalises_legacy_fields() {
        let reply: Reply = deserialize_message(
            r#"{"phase_id": 1, "phase_label": "Focus", "left": 59, "total": 60}"#,
        )
        .unwrap();
        let status = StatusPayload::from_reply(reply).unwrap();
        assert_eq!(status.phase_id, "1");
        assert_eq!(status.remaining_s, 59);
        assert_eq!(status.duration_s, 60);
        assert_eq!(status.elapsed_s, 1);
        assert!((status.progress - 1.0 / 60.0).abs() < 1e-9);
        assert_eq!(status.mode(), Some(DisplayMode::Countdown));
    }

    #[test]
    fn current_fields_win_over_legacy_ones() {
        let reply: Reply = deserialize_message(
            r#"{"phase_id": "1_Focus", "remaining_s": 30, "left": 99,
                "duration_s": 60, "total": 99, "elapsed_s": 30,
                "progress": 0.5, "display": "dots", "dot_interval": 10}"#,
        )
        .unwrap();
        let status = StatusPayload::from_reply(reply).unwrap();
        assert_eq!(status.remaining_s, 30);
        assert_eq!(status.duration_s, 60);
        assert_eq!(status.progress, 0.5);
        assert_eq!(status.mode(), Some(DisplayMode::Dots));
        assert_eq!(status.dot_interval, Some(10));
    }

    #[test]
    fn missing_phase_id_falls_back_to_label() {
        let reply: Reply =
            deserialize_message(r#"{"phase_label": "[1/1] Focus", "left": 9, "total": 60}"#)
                .unwrap();
        let status = StatusPayload::from_reply(reply).unwrap();
        assert_eq!(status.phase_id, "[1/1] Focus");
    }

    #[test]
    fn progress_is_clamped() {
        let reply: Reply =
            deserialize_message(r#"{"remaining_s": 0, "duration_s": 60, "progress": 1.7}"#)
                .unwrap();
        assert_eq!(StatusPayload::from_reply(reply).unwrap().progress, 1.0);
    }

    #[test]
    fn reply_without_timing_is_unusable() {
        assert!(StatusPayload::from_reply(Reply::ok()).is_none());
    }

    #[test]
    fn display_mode_names() {
        for mode in DisplayMode::ALL {
            assert_eq!(mode.as_str().parse::<DisplayMode>(), Ok(mode));
        }
        assert!("sparkles".parse::<DisplayMode>().is_err());
        assert_eq!(
            serde_json::to_value(DisplayMode::CountUp).unwrap(),
            json!("timer-forward")
        );
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let big = format!("{}\n", "x".repeat(MAX_FRAME_BYTES + 10));
        let mut reader = tokio::io::BufReader::new(big.as_bytes());
        let mut buf = Vec::new();
        let err = read_frame(&mut reader, &mut buf).await.unwrap_err();
        assert!(matches!(err, IpcError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn frames_round_trip_line_by_line() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &Request::Status).await.unwrap();
        write_frame(&mut wire, &Request::Abort).await.unwrap();

        let mut reader = tokio::io::BufReader::new(wire.as_slice());
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf).await.unwrap());
        assert_eq!(deserialize_frame::<Request>(&buf).unwrap(), Request::Status);
        assert!(read_frame(&mut reader, &mut buf).await.unwrap());
        assert_eq!(deserialize_frame::<Request>(&buf).unwrap(), Request::Abort);
        assert!(!read_frame(&mut reader, &mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error_not_a_stream_error() {
        let wire: &[u8] = b"{\"type\":\"status\xff\"}\n{\"type\":\"abort\"}\n";
        let mut reader = tokio::io::BufReader::new(wire);
        let mut buf = Vec::new();

        assert!(read_frame(&mut reader, &mut buf).await.unwrap());
        assert!(deserialize_frame::<Request>(&buf).is_err());
        // The next frame on the same stream is intact.
        assert!(read_frame(&mut reader, &mut buf).await.unwrap());
        assert_eq!(deserialize_frame::<Request>(&buf).unwrap(), Request::Abort);
    }
}
