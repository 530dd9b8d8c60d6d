//! Scripted in-process peers for connection tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use apn_core::{
    ErrorResponse, NOTIFICATION_HEADER_LEN, NotificationFrame, Status, notification_payload_len,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::{Connector, PushError};

/// How the fake peer behaves on one connection.
pub enum Script {
    /// Read frames until the client hangs up.
    Accept,
    /// After reading frame `on`, report `report` with `status` and hang up.
    Reject { on: u32, report: u32, status: Status },
    /// Hang up before the client writes anything.
    Reset,
    /// Refuse the connection.
    Refuse,
    /// Send these bytes, then hang up.
    Send(Vec<u8>),
}

/// Connector whose peer follows one [`Script`] per connection, then refuses.
pub struct FakeConnector {
    scripts: Mutex<VecDeque<Script>>,
    received: Arc<Mutex<Vec<NotificationFrame>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connects: Mutex<usize>,
    buffer: usize,
}

impl FakeConnector {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            received: Arc::default(),
            tasks: Mutex::default(),
            connects: Mutex::default(),
            buffer: 64 * 1024,
        }
    }

    /// Limit each connection to `bytes` in flight, so writes block until
    /// the peer reads and fail once it hangs up.
    pub fn with_buffer(mut self, bytes: usize) -> Self {
        self.buffer = bytes;
        self
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }

    /// Wait for every peer to finish, then return the frames they read.
    pub async fn received(&self) -> Vec<NotificationFrame> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.await.unwrap();
        }
        self.received.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    fn peer(&self) -> String {
        "fake".to_string()
    }

    async fn connect(&self) -> Result<DuplexStream, PushError> {
        *self.connects.lock().unwrap() += 1;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Refuse);

        let (client, server) = tokio::io::duplex(self.buffer);
        let task = match script {
            Script::Refuse => {
                return Err(PushError::Connection {
                    host: self.peer(),
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                });
            }
            Script::Reset => {
                drop(server);
                return Ok(client);
            }
            Script::Send(bytes) => tokio::spawn(async move {
                let mut server = server;
                let _ = server.write_all(&bytes).await;
            }),
            Script::Accept => tokio::spawn(serve(server, None, self.received.clone())),
            Script::Reject { on, report, status } => tokio::spawn(serve(
                server,
                Some((on, ErrorResponse::new(status, report))),
                self.received.clone(),
            )),
        };
        self.tasks.lock().unwrap().push(task);
        Ok(client)
    }
}

async fn serve(
    mut server: DuplexStream,
    reject: Option<(u32, ErrorResponse)>,
    received: Arc<Mutex<Vec<NotificationFrame>>>,
) {
    loop {
        let mut frame = vec![0u8; NOTIFICATION_HEADER_LEN];
        if server.read_exact(&mut frame).await.is_err() {
            return;
        }
        frame.resize(NOTIFICATION_HEADER_LEN + notification_payload_len(&frame).unwrap(), 0);
        if server
            .read_exact(&mut frame[NOTIFICATION_HEADER_LEN..])
            .await
            .is_err()
        {
            return;
        }

        let frame = NotificationFrame::decode(&frame).unwrap();
        let id = frame.identifier;
        received.lock().unwrap().push(frame);

        if let Some((on, response)) = reject {
            if id == on {
                let _ = server.write_all(&response.encode()).await;
                return;
            }
        }
    }
}
