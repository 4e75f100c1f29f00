use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wcconfig::get_config;
use wcserver::RadioListener;
use wcstation::{
    Broadcaster, ClientRegistry, RecentlyPlayedTracks, ShoutcastMetadata, TrackSequencer,
    Tracklist,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ========== PHASE 1 : Infrastructure ==========

    let config = get_config();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Fatal configuration errors abort startup before any resource is
    // touched: bad bitrate range, missing encoder, missing tracklist.
    config.validate()?;

    // ========== PHASE 2 : Station assembly ==========

    info!("🎵 Loading tracklist...");
    let tracks = Tracklist::load(Path::new(&config.get_tracklist())).await?;

    let recent =
        RecentlyPlayedTracks::load(config.get_recent_file(), config.get_recent_capacity()).await?;
    let sequencer = TrackSequencer::new(
        tracks,
        config.get_start_track(),
        config.get_song_index_file().into(),
        recent,
        Arc::new(ShoutcastMetadata::new()),
    );

    // Range-checked by validate() above.
    let bitrate = config.get_bitrate() as u32;

    let stop = CancellationToken::new();
    let broadcaster = Broadcaster::new(
        sequencer,
        ClientRegistry::new(),
        config.get_encoder_exe().into(),
        bitrate,
        stop.clone(),
    );
    let station = broadcaster.station();

    info!("📡 Binding listener port...");
    let listener = RadioListener::bind(
        &config.get_bind_host(),
        config.get_port(),
        &config.get_station_name(),
        &config.get_station_genre(),
        bitrate,
    )
    .await?;
    info!("✅ Accepting players on {}", listener.local_addr()?);
    let listener_task = tokio::spawn(listener.run(station.clone(), stop.clone()));

    // ========== PHASE 3 : On air ==========

    let mut loop_task = broadcaster.spawn();
    info!("✅ WaveCast is on air!");
    info!("Press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, stopping station...");
            station.stop();
            match (&mut loop_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Broadcast loop failed during shutdown"),
                Err(e) => error!(error = %e, "Broadcast task panicked"),
            }
        }
        result = &mut loop_task => {
            match result {
                Ok(Ok(())) => info!("Broadcast loop ended"),
                Ok(Err(e)) => error!(error = %e, "Broadcast loop failed"),
                Err(e) => error!(error = %e, "Broadcast task panicked"),
            }
            station.stop();
        }
    }

    let _ = listener_task.await;
    info!("WaveCast stopped");
    Ok(())
}
