//! Client side of the daemon connection

use crate::{
    deserialize_frame, read_frame, write_frame, IpcError, Reply, Request, StatusPayload,
};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Outcome of one `status` poll
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPoll {
    Running(StatusPayload),
    /// The daemon has no session anymore
    Ended,
    /// The reply decoded but carried nothing usable this tick
    Unusable,
}

/// How long a reply may take before the daemon is considered unreachable.
/// The daemon serves one connection at a time, so a second client queues
/// in the accept backlog until this fires.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// One authenticated-or-not connection to the session daemon.
///
/// Requests are strictly sequential: every call writes one frame and reads
/// exactly one reply before returning.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    frame: Vec<u8>,
}

impl Connection {
    pub async fn connect(port: u16) -> Result<Self, IpcError> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::ConnectionRefused => IpcError::ConnectionRefused,
                _ => IpcError::Io(e),
            })?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        debug!(port, "connected to daemon");
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            frame: Vec::new(),
        })
    }

    /// Send one request and wait for its reply.
    pub async fn request(&mut self, request: &Request) -> Result<Reply, IpcError> {
        write_frame(&mut self.writer, request).await?;
        let read = read_frame(&mut self.reader, &mut self.frame);
        let got_frame = tokio::time::timeout(REPLY_TIMEOUT, read)
            .await
            .map_err(|_| IpcError::Timeout)??;
        if !got_frame {
            return Err(IpcError::ConnectionClosed);
        }
        Ok(deserialize_frame(&self.frame)?)
    }

    /// Authenticate with the shared secret. `Ok(false)` means the daemon said no.
    pub async fn hello(&mut self, secret: &str) -> Result<bool, IpcError> {
        let reply = self
            .request(&Request::Hello {
                secret: secret.to_string(),
            })
            .await?;
        Ok(reply.is_ok())
    }

    /// Poll the current phase. Undecodable replies are reported as
    /// [`StatusPoll::Unusable`] rather than errors; only transport
    /// failures are `Err`.
    pub async fn status(&mut self) -> Result<StatusPoll, IpcError> {
        let reply = match self.request(&Request::Status).await {
            Ok(reply) => reply,
            Err(IpcError::Serialization(e)) => {
                debug!("undecodable status reply: {}", e);
                return Ok(StatusPoll::Unusable);
            }
            Err(e) => return Err(e),
        };
        if reply.is_ended() {
            return Ok(StatusPoll::Ended);
        }
        if !reply.is_ok() {
            debug!(message = ?reply.message, "daemon returned an error for status");
            return Ok(StatusPoll::Unusable);
        }
        Ok(StatusPayload::from_reply(reply)
            .map(StatusPoll::Running)
            .unwrap_or(StatusPoll::Unusable))
    }

    pub async fn end_phase(&mut self) -> Result<(), IpcError> {
        self.command(Request::EndPhase).await
    }

    pub async fn abort(&mut self) -> Result<(), IpcError> {
        self.command(Request::Abort).await
    }

    async fn command(&mut self, request: Request) -> Result<(), IpcError> {
        let reply = self.request(&request).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(IpcError::Rejected(
                reply.message.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Shut down the write half so the daemon sees a clean end of stream.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("error closing connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers each request with the next canned reply, verbatim.
    async fn fake_daemon(replies: Vec<&'static [u8]>) -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = tokio::io::BufReader::new(reader);
            let mut request = Vec::new();
            for reply in replies {
                request.clear();
                if reader.read_until(b'\n', &mut request).await.unwrap() == 0 {
                    return;
                }
                writer.write_all(reply).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn undecodable_status_is_skipped_not_fatal() {
        let port = fake_daemon(vec![
            &b"{\"status\":\"ok\"}\n"[..],
            &b"{\"phase_label\":\"\xff\",\"left\":5,\"total\":60}\n"[..],
            &b"{\"phase_label\":\"[1/1] Focus\",\"left\":4,\"total\":60}\n"[..],
        ])
        .await;

        let mut conn = Connection::connect(port).await.unwrap();
        assert!(conn.hello("s3cret").await.unwrap());
        assert_eq!(conn.status().await.unwrap(), StatusPoll::Unusable);
        match conn.status().await.unwrap() {
            StatusPoll::Running(status) => assert_eq!(status.remaining_s, 4),
            other => panic!("expected a running phase, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ended_and_error_replies() {
        let port = fake_daemon(vec![
            &b"{\"status\":\"error\",\"message\":\"not authenticated\"}\n"[..],
            &b"{\"status\":\"ended\"}\n"[..],
            &b"{\"status\":\"error\",\"message\":\"not authenticated\"}\n"[..],
        ])
        .await;

        let mut conn = Connection::connect(port).await.unwrap();
        assert_eq!(conn.status().await.unwrap(), StatusPoll::Unusable);
        assert_eq!(conn.status().await.unwrap(), StatusPoll::Ended);
        assert!(matches!(conn.abort().await, Err(IpcError::Rejected(_))));
    }
}
