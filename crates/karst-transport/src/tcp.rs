//! TCP transport, with optional TLS wrapping.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, TransportError};

/// Read chunk size. One chunk may carry part of a frame or several
/// frames; the session's decoder reassembles.
const READ_BUF_LEN: usize = 8192;

/// Object-safe alias for the underlying byte stream, so plain and
/// TLS-wrapped sockets share one connection type.
trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

type BoxedIo = Box<dyn Io>;

/// A client-side TCP connection to one Karst node.
pub struct TcpConnection {
    id: ConnectionId,
    peer: String,
    reader: Mutex<ReadHalf<BoxedIo>>,
    writer: Mutex<WriteHalf<BoxedIo>>,
}

impl TcpConnection {
    /// Dials `host:port`; with `secure` set, wraps the socket in TLS
    /// before any protocol bytes are exchanged.
    pub async fn connect(
        host: &str,
        port: u16,
        secure: bool,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(TransportError::ConnectFailed)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("{host}:{port}"));

        let io: BoxedIo = if secure {
            tls_wrap(stream, host).await?
        } else {
            Box::new(stream)
        };
        let (reader, writer) = tokio::io::split(io);

        let id = ConnectionId::next();
        tracing::debug!(%id, %peer, secure, "tcp connection established");

        Ok(Self {
            id,
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }
}

impl Connection for TcpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; READ_BUF_LEN];
        let n = self
            .reader
            .lock()
            .await
            .read(&mut buf)
            .await
            .map_err(TransportError::RecvFailed)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Shutting down the write side sends FIN; the peer (and our
        // own reader task) observe EOF and finish the teardown.
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn peer_addr(&self) -> String {
        self.peer.clone()
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(feature = "tls")]
async fn tls_wrap(stream: TcpStream, host: &str) -> Result<BoxedIo, TransportError> {
    use std::sync::Arc;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let name = ServerName::try_from(host.to_owned())
        .map_err(|_| TransportError::Tls(format!("invalid server name `{host}`")))?;
    let tls = connector
        .connect(name, stream)
        .await
        .map_err(TransportError::ConnectFailed)?;
    Ok(Box::new(tls))
}

#[cfg(not(feature = "tls"))]
async fn tls_wrap(_stream: TcpStream, host: &str) -> Result<BoxedIo, TransportError> {
    Err(TransportError::Tls(format!(
        "secure connection to `{host}` requested but the `tls` feature is not enabled"
    )))
}
