//! The broadcast loop
//!
//! The long-running heart of the station: one task that pulls encoded
//! audio from the encoder process chunk by chunk, fans each chunk out to
//! every connected client, interleaves the current track's metadata
//! block, paces itself to real time and drives track advancement.
//!
//! Failure isolation is the point of this loop. A client that errors,
//! stalls or hangs up is removed and closed inside the iteration that
//! notices it; nothing a single client does can stall the stream for the
//! others or abort the loop.
//!
//! Readiness is checked per client with `try_write`/`try_read`: a
//! `WouldBlock` before any byte moved means "not ready, retry next
//! iteration". That is the platform's zero-timeout select, without a
//! central poll call.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::encoder::EncoderProcess;
use crate::pacing::sleep_duration;
use crate::registry::{ClientId, ClientRegistry, ClientSet};
use crate::tracklist::TrackSequencer;
use crate::Result;

/// Bytes of encoded audio read from the encoder and sent per iteration.
pub const CHUNK_SIZE: usize = 2048;

/// Upper bound on one liveness receive from a client.
const RECV_SIZE: usize = 1024;

/// How long a client that accepted part of a chunk may stall before it
/// is dropped. The readiness probe itself never waits; this bound only
/// applies once a send is underway, so a wedged peer cannot hold the
/// iteration hostage.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of one per-client send attempt.
enum SendOutcome {
    /// Chunk (and metadata, when present) fully delivered.
    Sent,
    /// Not write-ready before any byte moved; retried next iteration.
    NotReady,
    /// The client failed mid-send and must be removed.
    Failed(io::Error),
}

/// The broadcast loop, consumed by [`Broadcaster::spawn`].
pub struct Broadcaster {
    sequencer: TrackSequencer,
    registry: ClientRegistry,
    encoder_exe: PathBuf,
    bitrate: u32,
    encoder: Option<EncoderProcess>,
    stop: CancellationToken,
}

impl Broadcaster {
    pub fn new(
        sequencer: TrackSequencer,
        registry: ClientRegistry,
        encoder_exe: PathBuf,
        bitrate: u32,
        stop: CancellationToken,
    ) -> Self {
        Self {
            sequencer,
            registry,
            encoder_exe,
            bitrate,
            encoder: None,
            stop,
        }
    }

    /// External control surface sharing this loop's registry and stop
    /// token.
    pub fn station(&self) -> Station {
        Station {
            registry: self.registry.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Starts the loop on its own task.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Runs the loop until the stop token fires or an unrecoverable
    /// error occurs. Teardown is unconditional on every exit path:
    /// all clients closed, registry cleared, encoder killed.
    pub async fn run(mut self) -> Result<()> {
        let result = self.stream_loop().await;
        self.teardown().await;
        result
    }

    async fn stream_loop(&mut self) -> Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            if self.stop.is_cancelled() {
                info!("Stop requested, leaving broadcast loop");
                return Ok(());
            }

            // No encoder yet (first iteration) reads as zero bytes and
            // flows through the same track-boundary path as a finished
            // track, so exactly one encoder is alive from the first
            // track onward.
            let read = match self.encoder.as_mut() {
                Some(encoder) => encoder.read_chunk(&mut chunk).await?,
                None => 0,
            };

            if read == 0 {
                if let Some(finished) = self.encoder.take() {
                    finished.terminate().await;
                }
                let track = self.sequencer.next().await?;
                self.encoder = Some(EncoderProcess::spawn(
                    &self.encoder_exe,
                    self.bitrate,
                    &track,
                )?);
                // No client I/O and no sleep on a boundary cycle.
                continue;
            }

            let start = Instant::now();
            let metadata = self.sequencer.current_metadata();

            {
                // One lock acquisition covers the whole readiness check
                // and respond sequence; clients added by the acceptor
                // meanwhile are picked up next iteration.
                let mut clients = self.registry.clients().await;
                self.broadcast_chunk(&mut clients, &chunk[..read], metadata.as_ref())
                    .await;
                self.poll_receive(&mut clients).await;
            }

            tokio::time::sleep(sleep_duration(CHUNK_SIZE, self.bitrate, start.elapsed())).await;
        }
    }

    /// Sends the chunk, then the metadata block, to every write-ready
    /// client. Failures remove exactly the failing client.
    async fn broadcast_chunk(
        &self,
        clients: &mut ClientSet<'_>,
        chunk: &[u8],
        metadata: Option<&Bytes>,
    ) {
        for id in clients.ids() {
            let outcome = match clients.get(id) {
                Some(client) => send_to_client(client.stream(), chunk, metadata).await,
                None => continue,
            };

            match outcome {
                SendOutcome::Sent => trace!(client = id, bytes = chunk.len(), "Chunk sent"),
                SendOutcome::NotReady => trace!(client = id, "Client not write-ready, deferred"),
                SendOutcome::Failed(e) => {
                    debug!(client = id, error = %e, "Send failed, dropping client");
                    clients.remove_and_close(id);
                }
            }
        }
    }

    /// Drains at most [`RECV_SIZE`] bytes from every read-ready client.
    ///
    /// Listeners do not speak any upstream protocol; this pass exists to
    /// notice peers that hung up (zero-length read) or errored.
    async fn poll_receive(&self, clients: &mut ClientSet<'_>) {
        let mut buf = [0u8; RECV_SIZE];

        for id in clients.ids() {
            let outcome = match clients.get(id) {
                Some(client) => client.stream().try_read(&mut buf),
                None => continue,
            };

            match outcome {
                Ok(0) => {
                    debug!(client = id, "Peer closed connection");
                    clients.remove_and_close(id);
                }
                Ok(n) => trace!(client = id, bytes = n, "Ignored client bytes"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    debug!(client = id, error = %e, "Receive failed, dropping client");
                    clients.remove_and_close(id);
                }
            }
        }
    }

    /// Unconditional cleanup: runs on stop and on failure exits alike.
    async fn teardown(&mut self) {
        let dropped = {
            let mut clients = self.registry.clients().await;
            clients.close_all()
        };
        if dropped > 0 {
            info!(clients = dropped, "Disconnected all clients");
        }

        if let Some(encoder) = self.encoder.take() {
            encoder.terminate().await;
        }
        info!("Broadcast loop stopped");
    }
}

/// Sends the full chunk, then the metadata block, without blocking the
/// iteration on an unready client.
async fn send_to_client(
    stream: &TcpStream,
    chunk: &[u8],
    metadata: Option<&Bytes>,
) -> SendOutcome {
    // The first write doubles as the readiness probe: WouldBlock before
    // any byte moved defers the client instead of failing it.
    match send_bytes(stream, chunk, true).await {
        SendOutcome::Sent => {}
        other => return other,
    }

    if let Some(block) = metadata {
        // The client already accepted the chunk, so the metadata append
        // must complete to keep the stream parseable; only the stall
        // bound applies here.
        return send_bytes(stream, block, false).await;
    }

    SendOutcome::Sent
}

/// Writes all of `data`, looping over partial sends.
///
/// With `probe` set, a `WouldBlock` before the first byte reports
/// `NotReady`. Once bytes are in flight the peer gets
/// [`WRITE_STALL_TIMEOUT`] per wait to become writable again, after
/// which the send fails.
async fn send_bytes(stream: &TcpStream, data: &[u8], probe: bool) -> SendOutcome {
    let mut sent = 0;

    while sent < data.len() {
        match stream.try_write(&data[sent..]) {
            Ok(0) => return SendOutcome::Failed(io::ErrorKind::WriteZero.into()),
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if probe && sent == 0 {
                    return SendOutcome::NotReady;
                }
                match tokio::time::timeout(WRITE_STALL_TIMEOUT, stream.writable()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => return SendOutcome::Failed(e),
                    Err(_) => {
                        warn!("Client stalled mid-chunk past the write bound");
                        return SendOutcome::Failed(io::ErrorKind::TimedOut.into());
                    }
                }
            }
            Err(e) => return SendOutcome::Failed(e),
        }
    }

    SendOutcome::Sent
}

/// Control surface exposed to the rest of the application.
///
/// Everything else about the station is internal: the acceptor adds
/// clients, anyone may request a stop or read the listener count.
#[derive(Clone)]
pub struct Station {
    registry: ClientRegistry,
    stop: CancellationToken,
}

impl Station {
    /// Hands an accepted connection over to the broadcast loop.
    pub async fn add_client(&self, stream: TcpStream) -> ClientId {
        self.registry.add(stream).await
    }

    /// Requests a cooperative stop; observed at the top of the next
    /// iteration.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// True once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Number of currently connected listeners.
    pub fn num_users(&self) -> usize {
        self.registry.num_users()
    }
}
