//! Feedback service connection.

use apn_core::{FEEDBACK_RECORD_LEN, FeedbackRecord};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Connector, PushError};

/// A drained-once stream of feedback records.
pub struct FeedbackConnection<S> {
    stream: S,
    peer: String,
    done: bool,
}

impl<S> FeedbackConnection<S>
where
    S: AsyncRead + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            done: false,
        }
    }

    pub async fn open<C>(connector: &C) -> Result<Self, PushError>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect().await?;
        Ok(Self::new(stream, connector.peer()))
    }

    /// Next record, or `None` once the service has closed the stream.
    ///
    /// A partial trailing record ends the stream.
    pub async fn next_record(&mut self) -> Result<Option<FeedbackRecord>, PushError> {
        if self.done {
            return Ok(None);
        }

        let mut buf = [0u8; FEEDBACK_RECORD_LEN];
        let mut filled = 0;
        while filled < buf.len() {
            let read = match self.stream.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(source) => {
                    self.done = true;
                    return Err(PushError::Connection {
                        host: self.peer.clone(),
                        source,
                    });
                }
            };
            if read == 0 {
                self.done = true;
                if filled > 0 {
                    tracing::debug!(peer = %self.peer, bytes = filled, "dropping partial feedback record");
                }
                return Ok(None);
            }
            filled += read;
        }

        FeedbackRecord::decode(&buf)
            .map(Some)
            .map_err(|e| PushError::MalformedFrame(e.to_string()))
    }

    /// Drain every remaining record.
    pub async fn read_all(mut self) -> Result<Vec<FeedbackRecord>, PushError> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apn_core::DeviceToken;
    use tokio::io::AsyncWriteExt;

    fn record(timestamp: u32, fill: u8) -> FeedbackRecord {
        FeedbackRecord {
            timestamp,
            token: DeviceToken::new([fill; 32]),
        }
    }

    #[tokio::test]
    async fn test_reads_until_close() {
        let (client, mut server) = tokio::io::duplex(1024);
        let records = [record(1_700_000_000, 1), record(1_700_000_100, 2)];
        for r in &records {
            server.write_all(&r.encode()).await.unwrap();
        }
        drop(server);

        let connection = FeedbackConnection::new(client, "test");
        assert_eq!(connection.read_all().await.unwrap(), records.to_vec());
    }

    #[tokio::test]
    async fn test_partial_tail_ends_stream() {
        let (client, mut server) = tokio::io::duplex(1024);
        let first = record(1_700_000_000, 1);
        server.write_all(&first.encode()).await.unwrap();
        server.write_all(&record(5, 2).encode()[..20]).await.unwrap();
        drop(server);

        let mut connection = FeedbackConnection::new(client, "test");
        assert_eq!(connection.next_record().await.unwrap(), Some(first));
        assert_eq!(connection.next_record().await.unwrap(), None);
        assert_eq!(connection.next_record().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_token_length() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut bytes = record(1, 1).encode();
        bytes[5] = 16;
        server.write_all(&bytes).await.unwrap();
        drop(server);

        let connection = FeedbackConnection::new(client, "test");
        assert!(matches!(
            connection.read_all().await,
            Err(PushError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_connection_error() {
        let stream = failing::FailingReader;
        let connection = FeedbackConnection::new(stream, "test");
        assert!(matches!(
            connection.read_all().await,
            Err(PushError::Connection { .. })
        ));
    }

    mod failing {
        use std::pin::Pin;
        use std::task::{Context, Poll};

        use tokio::io::{AsyncRead, ReadBuf};

        pub struct FailingReader;

        impl AsyncRead for FailingReader {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                Poll::Ready(Err(std::io::ErrorKind::ConnectionReset.into()))
            }
        }
    }
}
