//! In-band stream metadata
//!
//! SHOUTcast-compatible players accept a small in-band block identifying
//! the current track, interleaved with the audio bytes. The broadcast
//! loop treats that block as opaque: it is computed once per track by a
//! [`MetadataProvider`] and appended verbatim after audio chunks.
//!
//! The provided implementation, [`ShoutcastMetadata`], reads the track's
//! tags with lofty and renders the classic `StreamTitle='…';` block,
//! zero-padded to a multiple of 16 bytes and prefixed with the padded
//! length divided by 16.

use async_trait::async_trait;
use bytes::Bytes;
use lofty::{config::ParseOptions, prelude::*, probe::Probe};
use std::path::Path;
use tracing::debug;

/// Largest stream title carried in a metadata block.
///
/// The length prefix counts 16-byte units in a single byte, so the padded
/// text can never exceed 255 * 16 bytes.
const MAX_TITLE_LEN: usize = 1024;

/// Source of the opaque per-track metadata block.
///
/// The broadcast core only ever calls [`metadata_for`] on a track change
/// and holds the returned block for the track's duration. `None` means
/// the track streams without in-band metadata.
///
/// [`metadata_for`]: MetadataProvider::metadata_for
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Returns the protocol-ready metadata block for `track`, if any.
    async fn metadata_for(&self, track: &Path) -> Option<Bytes>;
}

/// Tag-based provider producing SHOUTcast `StreamTitle` blocks.
pub struct ShoutcastMetadata;

impl ShoutcastMetadata {
    pub fn new() -> Self {
        Self
    }

    /// Builds the display title for a track: `Artist - Title` when both
    /// tags are present, the lone tag when only one is, and the file stem
    /// when the file carries no readable tags at all.
    fn stream_title(track: &Path) -> Option<String> {
        let tagged = Probe::open(track)
            .and_then(|probe| probe.options(ParseOptions::new()).read());

        if let Ok(tagged_file) = tagged {
            let tag = tagged_file
                .primary_tag()
                .or_else(|| tagged_file.first_tag());

            if let Some(tag) = tag {
                let title = tag.title().map(|s| s.to_string());
                let artist = tag.artist().map(|s| s.to_string());
                match (artist, title) {
                    (Some(artist), Some(title)) => {
                        return Some(format!("{} - {}", artist, title))
                    }
                    (None, Some(title)) => return Some(title),
                    (Some(artist), None) => return Some(artist),
                    (None, None) => {}
                }
            }
        }

        // Untagged or unreadable file: show the file name so listeners
        // still see something.
        track
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl MetadataProvider for ShoutcastMetadata {
    async fn metadata_for(&self, track: &Path) -> Option<Bytes> {
        let title = Self::stream_title(track)?;
        debug!(track = %track.display(), title = %title, "Prepared stream metadata");
        Some(format_stream_title(&title))
    }
}

impl Default for ShoutcastMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders `StreamTitle='<title>';` as a SHOUTcast metadata block.
///
/// The text is zero-padded to the next multiple of 16 bytes and prefixed
/// with one byte holding the padded length divided by 16. Single quotes
/// in the title would terminate the value early on most players, so they
/// are replaced with backticks.
pub fn format_stream_title(title: &str) -> Bytes {
    let mut title = title.replace('\'', "`");
    title.truncate(MAX_TITLE_LEN);

    let text = format!("StreamTitle='{}';", title);
    let units = (text.len() + 15) / 16;

    let mut block = Vec::with_capacity(1 + units * 16);
    block.push(units as u8);
    block.extend_from_slice(text.as_bytes());
    block.resize(1 + units * 16, 0);
    Bytes::from(block)
}
