//! Encoder process supervision
//!
//! Each track is encoded by one external encoder process (lame by
//! default) writing the compressed stream to stdout. The manager is a
//! thin supervisor: it spawns the process, exposes stdout as a chunked
//! byte source and kills the process when the track is over. It never
//! buffers audio itself.
//!
//! A zero-byte read from stdout is the end-of-track signal. It is not an
//! error, and it is also how an encoder that crashed mid-track shows up:
//! both cases are handled identically by the broadcast loop (terminate,
//! advance, respawn).

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

use crate::{Error, Result};

/// One live encoder subprocess bound to exactly one track.
///
/// At most one `EncoderProcess` exists at a time; the broadcast loop
/// owns it and replaces it on every track boundary.
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
    stdout: ChildStdout,
    track: String,
}

impl EncoderProcess {
    /// Spawns the encoder for `track`, streaming to stdout:
    /// `<exe> -b <bitrate> --noreplaygain --quiet <track> -`
    pub fn spawn(exe: &Path, bitrate: u32, track: &str) -> Result<Self> {
        let mut child = Command::new(exe)
            .arg("-b")
            .arg(bitrate.to_string())
            .arg("--noreplaygain")
            .arg("--quiet")
            .arg(track)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::EncoderSpawn)?;

        let stdout = child.stdout.take().ok_or(Error::EncoderNoStdout)?;

        info!(track, bitrate, "Streaming");
        Ok(Self {
            child,
            stdout,
            track: track.to_string(),
        })
    }

    /// Reads up to `buf.len()` bytes of encoded audio.
    ///
    /// Blocks until the encoder produces data, which is the intended
    /// backpressure: the loop can never outrun the encoder. `Ok(0)`
    /// means the track is exhausted (or the encoder died).
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf).await
    }

    /// Kills the encoder unconditionally and reaps it.
    ///
    /// There is no graceful shutdown: stdout is consumed in a tight read
    /// loop, so the process must be gone before a replacement is
    /// spawned. Killing an already-exited process is a no-op.
    pub async fn terminate(mut self) {
        match self.child.kill().await {
            Ok(()) => debug!(track = %self.track, "Encoder terminated"),
            Err(e) => debug!(track = %self.track, error = %e, "Encoder already gone"),
        }
    }
}
