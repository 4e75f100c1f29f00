//! # wcserver - WaveCast connection acceptor
//!
//! Accepts inbound listener connections, performs a minimal
//! SHOUTcast-compatible handshake and hands the socket over to the
//! station core. The station itself never accepts connections; this
//! crate is the only producer of clients.
//!
//! The handshake is deliberately one-sided: whatever the player sends
//! as a request is read and discarded (there is exactly one stream to
//! serve), then the `ICY 200 OK` header block goes out and the socket
//! joins the broadcast registry. From that point on the client only
//! ever receives audio chunks and in-band metadata.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wcstation::Station;

/// A player gets this long to send its request and take the headers.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on the ignored request; anything longer is treated as complete.
const MAX_REQUEST: usize = 1024;

/// Errors raised by the acceptor
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Specialized Result type for wcserver
pub type Result<T> = std::result::Result<T, Error>;

/// TCP acceptor for SHOUTcast-compatible players.
pub struct RadioListener {
    listener: TcpListener,
    headers: String,
}

impl RadioListener {
    /// Binds the listener and prepares the station's header block.
    pub async fn bind(
        host: &str,
        port: u16,
        name: &str,
        genre: &str,
        bitrate: u32,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        let headers = format!(
            "ICY 200 OK\r\n\
             icy-notice1:<BR>This stream requires a SHOUTcast compatible player.<BR>\r\n\
             icy-name:{}\r\n\
             icy-genre:{}\r\n\
             icy-pub:1\r\n\
             icy-br:{}\r\n\
             content-type:audio/mpeg\r\n\
             \r\n",
            name, genre, bitrate
        );

        Ok(Self { listener, headers })
    }

    /// The bound address, useful when the port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `stop` fires.
    ///
    /// Each handshake runs on its own task so a slow player cannot
    /// delay other inbound connections; a failed handshake drops only
    /// that connection.
    pub async fn run(self, station: Station, stop: CancellationToken) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "Accepting listeners");

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("Listener stopping");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "Inbound connection");
                            let station = station.clone();
                            let headers = self.headers.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handshake(stream, headers, station).await {
                                    debug!(%peer, error = %e, "Handshake failed");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }
        }
    }
}

/// Reads the player's request, replies with the header block, then
/// registers the socket with the station.
async fn handshake(mut stream: TcpStream, headers: String, station: Station) -> io::Result<()> {
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut request = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") || request.len() >= MAX_REQUEST {
                break;
            }
        }

        stream.write_all(headers.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    })
    .await
    .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;

    station.add_client(stream).await;
    Ok(())
}
