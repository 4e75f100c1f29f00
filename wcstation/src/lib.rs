//! # wcstation - WaveCast station core
//!
//! The always-on engine of a single-station MP3 radio transmitter:
//! it encodes a fixed playlist through an external encoder process and
//! fans the resulting stream out, chunk by chunk and paced to real time,
//! to every connected listener.
//!
//! # Architecture
//!
//! - **[`Tracklist`] / [`TrackSequencer`]** : the read-only playlist and
//!   the cycling playback cursor with its persisted side state
//! - **[`EncoderProcess`]** : supervisor of the one live external
//!   encoder subprocess, consumed as a byte stream
//! - **[`ClientRegistry`]** : concurrent-safe set of connected sockets,
//!   fed by the acceptor, drained by the loop
//! - **[`Broadcaster`]** : the broadcast loop itself, with the pacing
//!   arithmetic in [`sleep_duration`]
//! - **[`Station`]** : the control surface (`add_client`, `stop`,
//!   `num_users`) handed to the acceptor and the application
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use wcstation::{
//!     Broadcaster, ClientRegistry, RecentlyPlayedTracks, ShoutcastMetadata,
//!     Tracklist, TrackSequencer,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> wcstation::Result<()> {
//! let tracks = Tracklist::load(std::path::Path::new("tracks.txt")).await?;
//! let recent = RecentlyPlayedTracks::load("/tmp/recent.log", 20).await?;
//! let sequencer = TrackSequencer::new(
//!     tracks,
//!     0,
//!     "/tmp/song.idx".into(),
//!     recent,
//!     Arc::new(ShoutcastMetadata::new()),
//! );
//!
//! let broadcaster = Broadcaster::new(
//!     sequencer,
//!     ClientRegistry::new(),
//!     "/usr/local/bin/lame".into(),
//!     128,
//!     CancellationToken::new(),
//! );
//! let station = broadcaster.station();
//! let handle = broadcaster.spawn();
//!
//! // ... hand accepted sockets to station.add_client(...) ...
//!
//! station.stop();
//! handle.await.unwrap()?;
//! # Ok(())
//! # }
//! ```

mod broadcaster;
mod datalog;
mod encoder;
mod error;
mod metadata;
mod pacing;
mod registry;
mod tracklist;

#[cfg(test)]
mod testutil;

// Public re-exports
pub use broadcaster::{Broadcaster, Station, CHUNK_SIZE};
pub use datalog::{dump_value, PlayedTrack, RecentlyPlayedTracks};
pub use encoder::EncoderProcess;
pub use error::{Error, Result};
pub use metadata::{format_stream_title, MetadataProvider, ShoutcastMetadata};
pub use pacing::sleep_duration;
pub use registry::{Client, ClientId, ClientRegistry, ClientSet};
pub use tracklist::{TrackSequencer, Tracklist};
