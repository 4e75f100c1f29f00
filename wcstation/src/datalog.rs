//! Small durable side state kept next to the broadcast loop
//!
//! Two pieces of state survive a restart: the index of the track about to
//! play (a single value overwritten on every track change, used to resume
//! near the same point) and a bounded history of recently played tracks.
//! Both are plain text files rewritten in full, there is nothing to merge.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::Result;

/// Overwrites `path` with a single value.
///
/// This is the instantaneous counterpart of the history log: only the
/// latest value matters, so the file always holds exactly one line.
pub async fn dump_value(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).await?;
    debug!(path = %path.display(), value, "Dumped state value");
    Ok(())
}

/// One entry of the recently played history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedTrack {
    pub played_at: DateTime<Utc>,
    pub name: String,
}

/// Bounded, most-recent-first history of played tracks.
///
/// The history is rewritten to its backing file on every update so that
/// external tools (status pages, last-played widgets) can read it at any
/// time. A missing file on load is an empty history, not an error.
pub struct RecentlyPlayedTracks {
    path: PathBuf,
    capacity: usize,
    entries: Vec<PlayedTrack>,
}

impl RecentlyPlayedTracks {
    /// Loads the history from `path`, keeping at most `capacity` entries.
    pub async fn load<P: Into<PathBuf>>(path: P, capacity: usize) -> Result<Self> {
        let path = path.into();
        let capacity = capacity.max(1);

        let mut entries = Vec::new();
        match fs::read_to_string(&path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    let Some((stamp, name)) = line.split_once('\t') else {
                        warn!(path = %path.display(), line, "Skipping malformed history line");
                        continue;
                    };
                    match DateTime::parse_from_rfc3339(stamp) {
                        Ok(played_at) => entries.push(PlayedTrack {
                            played_at: played_at.with_timezone(&Utc),
                            name: name.to_string(),
                        }),
                        Err(e) => {
                            warn!(path = %path.display(), line, error = %e, "Skipping malformed history timestamp");
                        }
                    }
                    if entries.len() >= capacity {
                        break;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            capacity,
            entries,
        })
    }

    /// Records `name` as the most recently played track and rewrites the
    /// backing file.
    pub async fn update(&mut self, name: &str) -> Result<()> {
        self.entries.insert(
            0,
            PlayedTrack {
                played_at: Utc::now(),
                name: name.to_string(),
            },
        );
        self.entries.truncate(self.capacity);

        let mut contents = String::new();
        for entry in &self.entries {
            contents.push_str(&entry.played_at.to_rfc3339_opts(SecondsFormat::Secs, true));
            contents.push('\t');
            contents.push_str(&entry.name);
            contents.push('\n');
        }
        fs::write(&self.path, contents).await?;
        Ok(())
    }

    /// Most-recent-first view of the history.
    pub fn entries(&self) -> &[PlayedTrack] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dump_value_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.idx");

        dump_value(&path, "3").await.unwrap();
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "3");

        dump_value(&path, "4").await.unwrap();
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "4");
    }

    #[tokio::test]
    async fn test_history_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let recent = RecentlyPlayedTracks::load(dir.path().join("recent.log"), 10)
            .await
            .unwrap();
        assert!(recent.entries().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recent.log");

        let mut recent = RecentlyPlayedTracks::load(&path, 3).await.unwrap();
        for name in ["a.mp3", "b.mp3", "c.mp3", "d.mp3"] {
            recent.update(name).await.unwrap();
        }

        let names: Vec<&str> = recent.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["d.mp3", "c.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_history_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recent.log");

        let mut recent = RecentlyPlayedTracks::load(&path, 5).await.unwrap();
        recent.update("one.mp3").await.unwrap();
        recent.update("two.mp3").await.unwrap();

        let reloaded = RecentlyPlayedTracks::load(&path, 5).await.unwrap();
        let names: Vec<&str> = reloaded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["two.mp3", "one.mp3"]);
    }
}
