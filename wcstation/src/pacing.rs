//! Chunk pacing arithmetic
//!
//! The broadcast loop deliberately sleeps between chunk sends so that the
//! stream leaves the station at roughly real-time playback speed, however
//! fast the encoder can actually produce data.
//!
//! The computation is kept as a free function so it can be tested on its
//! own: given the chunk size, the stream bitrate and the wall-clock time
//! already spent in the current iteration, it returns how long the loop
//! still has to wait before the next chunk.

use std::time::Duration;

/// Returns the remaining sleep time for one chunk iteration.
///
/// The target interval for a chunk is `chunk_size / bytes_per_second`
/// with `bytes_per_second = (bitrate_kbps / 8) * 1024`. Time already
/// spent in the iteration is subtracted, and the result is clamped at
/// zero: when an iteration overruns its interval the loop proceeds
/// immediately instead of trying to catch up.
///
/// A bitrate of zero disables pacing entirely (zero sleep), the loop
/// then runs at whatever rate the encoder delivers.
pub fn sleep_duration(chunk_size: usize, bitrate_kbps: u32, elapsed: Duration) -> Duration {
    let bytes_per_sec = (bitrate_kbps as f64 / 8.0) * 1024.0;
    if bytes_per_sec <= 0.0 {
        return Duration::ZERO;
    }

    let target = chunk_size as f64 / bytes_per_sec;
    let remaining = target - elapsed.as_secs_f64();
    if remaining <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(chunk_size: usize, bitrate_kbps: u32, elapsed: f64) -> f64 {
        let target = chunk_size as f64 / ((bitrate_kbps as f64 / 8.0) * 1024.0);
        (target - elapsed).max(0.0)
    }

    #[test]
    fn test_full_interval_at_128_kbps() {
        // 128 kbit/s = 16384 bytes/s, 2048 bytes = 125 ms per chunk
        let d = sleep_duration(2048, 128, Duration::ZERO);
        assert!((d.as_secs_f64() - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_time_is_subtracted() {
        let d = sleep_duration(2048, 128, Duration::from_millis(100));
        assert!((d.as_secs_f64() - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_overrun_clamps_to_zero() {
        // An iteration slower than the target interval never yields a
        // negative sleep, the loop just continues immediately.
        let d = sleep_duration(2048, 128, Duration::from_secs(1));
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn test_zero_bitrate_disables_pacing() {
        assert_eq!(sleep_duration(2048, 0, Duration::ZERO), Duration::ZERO);
        assert_eq!(sleep_duration(2048, 0, Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_formula_across_valid_bitrates() {
        for bitrate in [8u32, 16, 24, 32, 64, 96, 128, 192, 256, 320, 512, 1024] {
            for elapsed_ms in [0u64, 10, 50, 125, 500] {
                let elapsed = Duration::from_millis(elapsed_ms);
                let d = sleep_duration(2048, bitrate, elapsed);
                let want = expected(2048, bitrate, elapsed.as_secs_f64());
                assert!(
                    (d.as_secs_f64() - want).abs() < 1e-9,
                    "bitrate={} elapsed={}ms: got {} want {}",
                    bitrate,
                    elapsed_ms,
                    d.as_secs_f64(),
                    want
                );
            }
        }
    }
}
