//! End-to-end broadcast loop tests with a stub encoder.
//!
//! The stub is a shell script that ignores the lame flags and cats the
//! track file to stdout, so each "track" streams its file contents
//! verbatim and then hits the end-of-track path.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use wcstation::{
    Broadcaster, ClientRegistry, MetadataProvider, RecentlyPlayedTracks, Station,
    TrackSequencer, Tracklist,
};

struct NoMetadata;

#[async_trait]
impl MetadataProvider for NoMetadata {
    async fn metadata_for(&self, _track: &Path) -> Option<Bytes> {
        None
    }
}

struct FixedMetadata(Bytes);

#[async_trait]
impl MetadataProvider for FixedMetadata {
    async fn metadata_for(&self, _track: &Path) -> Option<Bytes> {
        Some(self.0.clone())
    }
}

fn stub_encoder(dir: &Path) -> PathBuf {
    let exe = dir.join("fakelame");
    std::fs::write(&exe, "#!/bin/sh\nshift 4\ncat \"$1\"\n").unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    exe
}

fn write_track(dir: &Path, name: &str, fill: u8, len: usize) -> String {
    let path = dir.join(name);
    std::fs::write(&path, vec![fill; len]).unwrap();
    path.to_str().unwrap().to_string()
}

async fn build_broadcaster(
    dir: &Path,
    tracks: Vec<String>,
    bitrate: u32,
    provider: Arc<dyn MetadataProvider>,
) -> Broadcaster {
    let tracks = Tracklist::from_tracks(tracks).unwrap();
    let recent = RecentlyPlayedTracks::load(dir.join("recent.log"), 10)
        .await
        .unwrap();
    let sequencer = TrackSequencer::new(tracks, 0, dir.join("song.idx"), recent, provider);

    Broadcaster::new(
        sequencer,
        ClientRegistry::new(),
        stub_encoder(dir),
        bitrate,
        CancellationToken::new(),
    )
}

/// Connects a listener to the station and returns the receiving side.
async fn connect_client(station: &Station) -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (accepted, _) = listener.accept().await.unwrap();
    station.add_client(accepted).await;
    connect.await.unwrap()
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for stream data")
        .unwrap();
    buf
}

#[tokio::test]
async fn test_tracks_stream_in_order_across_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_track(dir.path(), "a.mp3", b'A', 100);
    let b = write_track(dir.path(), "b.mp3", b'B', 100);

    let broadcaster =
        build_broadcaster(dir.path(), vec![a, b], 1024, Arc::new(NoMetadata)).await;
    let station = broadcaster.station();
    let mut client = connect_client(&station).await;
    let handle = broadcaster.spawn();

    // Two full playlist cycles, byte for byte: boundary iterations send
    // nothing, so the client sees only track contents, in order.
    let received = read_exactly(&mut client, 400).await;
    assert_eq!(&received[..100], vec![b'A'; 100].as_slice());
    assert_eq!(&received[100..200], vec![b'B'; 100].as_slice());
    assert_eq!(&received[200..300], vec![b'A'; 100].as_slice());
    assert_eq!(&received[300..400], vec![b'B'; 100].as_slice());

    station.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(station.num_users(), 0);
}

#[tokio::test]
async fn test_metadata_is_appended_after_each_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let track = write_track(dir.path(), "only.mp3", b'X', 64);
    let block = Bytes::from_static(b"\x01StreamTitle='t';\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0");

    let broadcaster = build_broadcaster(
        dir.path(),
        vec![track],
        1024,
        Arc::new(FixedMetadata(block.clone())),
    )
    .await;
    let station = broadcaster.station();
    let handle = broadcaster.spawn();

    // Added mid-run: picked up on a following iteration.
    let mut client = connect_client(&station).await;

    // Each cycle delivers the whole 64-byte track as one chunk followed
    // by the metadata block. Sync on the first full cycle boundary.
    let cycle = 64 + block.len();
    let received = read_exactly(&mut client, cycle * 2).await;

    let first = &received[..cycle];
    assert_eq!(&first[..64], vec![b'X'; 64].as_slice());
    assert_eq!(&first[64..], &block[..]);

    let second = &received[cycle..];
    assert_eq!(&second[..64], vec![b'X'; 64].as_slice());
    assert_eq!(&second[64..], &block[..]);

    station.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_hung_up_client_is_removed_without_disturbing_others() {
    let dir = tempfile::tempdir().unwrap();
    let track = write_track(dir.path(), "loop.mp3", b'Z', 256);

    let broadcaster =
        build_broadcaster(dir.path(), vec![track], 1024, Arc::new(NoMetadata)).await;
    let station = broadcaster.station();

    let mut survivor = connect_client(&station).await;
    let quitter = connect_client(&station).await;
    assert_eq!(station.num_users(), 2);

    let handle = broadcaster.spawn();

    // One peer hangs up; the read pass notices the zero-length receive.
    drop(quitter);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while station.num_users() != 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "closed client was never removed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The survivor keeps receiving the stream.
    let received = read_exactly(&mut survivor, 256).await;
    assert!(received.iter().all(|&b| b == b'Z'));

    station.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(station.num_users(), 0);
}

#[tokio::test]
async fn test_track_index_is_persisted_per_selection() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_track(dir.path(), "a.mp3", b'A', 32);
    let b = write_track(dir.path(), "b.mp3", b'B', 32);

    // 8 kbit/s paces one chunk per two seconds, leaving a wide window
    // to observe the persisted index between track boundaries.
    let broadcaster = build_broadcaster(dir.path(), vec![a, b], 8, Arc::new(NoMetadata)).await;
    let station = broadcaster.station();
    let mut client = connect_client(&station).await;
    let handle = broadcaster.spawn();

    // After the first track's bytes arrive, index 0 has been persisted.
    read_exactly(&mut client, 32).await;
    assert_eq!(
        std::fs::read_to_string(dir.path().join("song.idx")).unwrap(),
        "0"
    );

    // After the second track's bytes, the pre-advance index was 1.
    read_exactly(&mut client, 32).await;
    assert_eq!(
        std::fs::read_to_string(dir.path().join("song.idx")).unwrap(),
        "1"
    );

    // The history holds both names, most recent first.
    let history = std::fs::read_to_string(dir.path().join("recent.log")).unwrap();
    let names: Vec<&str> = history
        .lines()
        .map(|line| line.split('\t').nth(1).unwrap())
        .collect();
    assert!(names[0].ends_with("b.mp3"));
    assert!(names[1].ends_with("a.mp3"));

    station.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_stop_tears_down_clients_and_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let track = write_track(dir.path(), "t.mp3", b'Q', 4096);

    let broadcaster =
        build_broadcaster(dir.path(), vec![track], 128, Arc::new(NoMetadata)).await;
    let station = broadcaster.station();
    let _a = connect_client(&station).await;
    let _b = connect_client(&station).await;
    let handle = broadcaster.spawn();

    // Let the loop run at least one paced iteration.
    tokio::time::sleep(Duration::from_millis(200)).await;

    station.stop();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(station.num_users(), 0);
}
