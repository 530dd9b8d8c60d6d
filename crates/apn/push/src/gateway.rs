//! Gateway connection.

use std::io::ErrorKind;
use std::time::Duration;

use apn_core::{ERROR_RESPONSE_LEN, ErrorResponse, decode_error_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Connector, PushError};

/// An open session with the gateway.
///
/// Dropping the connection releases the session; [`close`](Self::close)
/// shuts it down cleanly first.
pub struct GatewayConnection<S> {
    stream: S,
    peer: String,
    poll_timeout: Duration,
}

impl<S> GatewayConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            stream,
            peer: peer.into(),
            poll_timeout,
        }
    }

    /// Open a session through `connector`.
    pub async fn open<C>(connector: &C, poll_timeout: Duration) -> Result<Self, PushError>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect().await?;
        Ok(Self::new(stream, connector.peer(), poll_timeout))
    }

    /// Write one whole frame.
    pub async fn write(&mut self, frame: &[u8]) -> Result<(), PushError> {
        self.stream.write_all(frame).await.map_err(PushError::Write)?;
        self.stream.flush().await.map_err(PushError::Write)
    }

    /// Wait up to the poll timeout for an error response.
    ///
    /// Silence for the whole window, or the peer closing without sending
    /// anything, means no error was reported.
    pub async fn poll_error(&mut self) -> Result<Option<ErrorResponse>, PushError> {
        let mut buf = [0u8; ERROR_RESPONSE_LEN];
        let mut filled = 0;
        let deadline = tokio::time::Instant::now() + self.poll_timeout;

        while filled < buf.len() {
            let read =
                match tokio::time::timeout_at(deadline, self.stream.read(&mut buf[filled..])).await
                {
                    Err(_) => break,
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) if filled == 0 && is_disconnect(&e) => {
                        tracing::debug!(peer = %self.peer, error = %e, "gateway hung up without a response");
                        return Ok(None);
                    }
                    Ok(Err(source)) => {
                        return Err(PushError::Connection {
                            host: self.peer.clone(),
                            source,
                        });
                    }
                };
            if read == 0 {
                break;
            }
            filled += read;
        }

        match filled {
            0 => Ok(None),
            ERROR_RESPONSE_LEN => {
                let response = decode_error_frame(&buf)
                    .map_err(|e| PushError::MalformedFrame(e.to_string()))?;
                tracing::debug!(
                    peer = %self.peer,
                    status = %response.status,
                    notification_id = response.identifier,
                    "gateway reported an error"
                );
                Ok(Some(response))
            }
            n => Err(PushError::MalformedFrame(format!(
                "error response cut off after {n} of {ERROR_RESPONSE_LEN} bytes"
            ))),
        }
    }

    /// Shut the session down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(peer = %self.peer, error = %e, "gateway shutdown failed");
        }
    }
}

fn is_disconnect(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}
