//! Opening streams to the gateway and feedback service.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::{Endpoint, PushError};

/// Opens byte streams to one remote service.
#[trait_variant::make(Send)]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Name of the remote end, for errors and logs.
    fn peer(&self) -> String;

    /// Open a fresh stream.
    async fn connect(&self) -> Result<Self::Stream, PushError>;
}

/// TLS over TCP with client-certificate authentication.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<rustls::ClientConfig>,
    endpoint: Endpoint,
}

impl TlsConnector {
    pub fn new(config: Arc<rustls::ClientConfig>, endpoint: Endpoint) -> Self {
        Self { config, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Connector for TlsConnector {
    type Stream = TlsStream<TcpStream>;

    fn peer(&self) -> String {
        self.endpoint.to_string()
    }

    async fn connect(&self) -> Result<Self::Stream, PushError> {
        let connection_error = |source| PushError::Connection {
            host: self.peer(),
            source,
        };

        let server_name = rustls::pki_types::ServerName::try_from(self.endpoint.host.clone())
            .map_err(|e| {
                connection_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;

        let tcp = TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port))
            .await
            .map_err(connection_error)?;
        tcp.set_nodelay(true).map_err(connection_error)?;

        let stream = tokio_rustls::TlsConnector::from(self.config.clone())
            .connect(server_name, tcp)
            .await
            .map_err(connection_error)?;

        tracing::debug!(peer = %self.endpoint, "TLS session established");
        Ok(stream)
    }
}
