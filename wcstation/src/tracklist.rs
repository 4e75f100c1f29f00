//! Tracklist loading and the track sequencer
//!
//! The tracklist is a read-only, ordered list of filenames loaded once at
//! startup. The [`TrackSequencer`] owns the playback cursor and advances
//! through the list deterministically, wrapping to the first entry after
//! the last one. Each advance persists the index of the track about to
//! play (so a restart resumes near the same point), records the track in
//! the recently played history and captures the metadata block that the
//! broadcast loop will interleave for the track's duration.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::datalog::{dump_value, RecentlyPlayedTracks};
use crate::metadata::MetadataProvider;
use crate::{Error, Result};

/// Immutable, ordered list of track filenames.
#[derive(Debug, Clone)]
pub struct Tracklist {
    tracks: Vec<String>,
}

impl Tracklist {
    /// Loads a tracklist file: one filename per line, blank lines
    /// ignored. An empty result is a configuration error, the station
    /// must not start on it.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::TracklistNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let tracks: Vec<String> = contents
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect();

        if tracks.is_empty() {
            return Err(Error::EmptyTracklist(path.display().to_string()));
        }

        info!("Queued {} songs", tracks.len());
        Ok(Self { tracks })
    }

    /// Builds a tracklist from already collected names. Empty input is
    /// rejected for the same reason as an empty file.
    pub fn from_tracks(tracks: Vec<String>) -> Result<Self> {
        if tracks.is_empty() {
            return Err(Error::EmptyTracklist("<memory>".to_string()));
        }
        Ok(Self { tracks })
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.tracks.get(index).map(String::as_str)
    }
}

/// Owns the playback cursor and the per-advance side effects.
///
/// Only the broadcast loop mutates the sequencer. External observers see
/// its progress through the persisted index file and the recently played
/// log, never through shared memory.
pub struct TrackSequencer {
    tracks: Tracklist,
    cursor: usize,
    index_file: PathBuf,
    recent: RecentlyPlayedTracks,
    provider: Arc<dyn MetadataProvider>,
    current_metadata: Option<Bytes>,
}

impl TrackSequencer {
    /// Creates a sequencer starting at `start_index`. An out-of-range
    /// start is normalized by the wrap check on the first `next()` call.
    pub fn new(
        tracks: Tracklist,
        start_index: usize,
        index_file: PathBuf,
        recent: RecentlyPlayedTracks,
        provider: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            tracks,
            cursor: start_index,
            index_file,
            recent,
            provider,
            current_metadata: None,
        }
    }

    /// Advances to the next track and returns its filename.
    ///
    /// Side effects, in order: the pre-advance index is persisted to the
    /// index file, the track is recorded in the recently played log, the
    /// metadata block for the track replaces the previous one, and the
    /// cursor moves forward. The wraparound to index 0 happens at the
    /// start of the call that would run past the end, not eagerly.
    pub async fn next(&mut self) -> Result<String> {
        if self.cursor >= self.tracks.len() {
            self.cursor = 0;
        }

        // The tracklist is never empty (rejected at load time), so the
        // wrapped cursor always lands on a track.
        let name = match self.tracks.get(self.cursor) {
            Some(name) => name.to_string(),
            None => return Err(Error::EmptyTracklist("<sequencer>".to_string())),
        };

        dump_value(&self.index_file, &self.cursor.to_string()).await?;
        self.recent.update(&name).await?;
        self.current_metadata = self.provider.metadata_for(Path::new(&name)).await;

        debug!(index = self.cursor, track = %name, "Selected next track");
        self.cursor += 1;

        Ok(name)
    }

    /// The metadata block of the track selected by the last `next()`.
    ///
    /// `Bytes` clones are reference counted, the block itself is shared.
    pub fn current_metadata(&self) -> Option<Bytes> {
        self.current_metadata.clone()
    }

    /// Read-only view of the recently played history.
    pub fn recently_played(&self) -> &RecentlyPlayedTracks {
        &self.recent
    }
}
