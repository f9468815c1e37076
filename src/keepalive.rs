//! Idle heartbeat
//!
//! Some proxies and mobile browsers drop WebSocket connections that stay quiet
//! for too long. When nobody has been broadcasting, the hub plays a short
//! synthetic broadcast from the `system` sentinel: started, one silent
//! payload, then ended after a short pause. The real broadcast lock is never
//! touched.
//!
//! The timer below only knocks on the hub's mailbox. Whether a cycle actually
//! runs is decided inside the hub, in order with every other event.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::KeepAliveConfig;
use crate::constants::MAX_SILENCE_MS;
use crate::hub::HubHandle;

/// Sample rate of the silent payload
pub const SILENCE_SAMPLE_RATE: u32 = 8_000;

/// Delay until the next heartbeat: interval ± jitter, never below the floor.
pub fn next_delay<R: Rng + ?Sized>(config: &KeepAliveConfig, rng: &mut R) -> Duration {
    let base = config.interval().as_millis() as i64;
    let jitter = config.jitter().as_millis() as i64;
    let offset = if jitter > 0 {
        rng.random_range(-jitter..=jitter)
    } else {
        0
    };

    let floor = config.min_interval().as_millis() as i64;
    Duration::from_millis((base + offset).max(floor).max(1) as u64)
}

/// 16-bit mono PCM WAV of silence, clipped to [`MAX_SILENCE_MS`]
pub fn silent_wav(duration: Duration, sample_rate: u32) -> Bytes {
    let millis = duration.as_millis().min(MAX_SILENCE_MS as u128) as u64;
    let samples = sample_rate as u64 * millis / 1000;
    // RIFF sizes are u32; saturate instead of wrapping
    let data_len = u32::try_from(samples * 2).unwrap_or(u32::MAX - 36);

    let mut buf = BytesMut::with_capacity(44 + data_len as usize);
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len);
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(16); // PCM header size
    buf.put_u16_le(1); // PCM
    buf.put_u16_le(1); // mono
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(sample_rate * 2); // byte rate
    buf.put_u16_le(2); // block align
    buf.put_u16_le(16); // bits per sample

    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    buf.put_bytes(0, data_len as usize);

    buf.freeze()
}

pub struct KeepAliveScheduler {
    config: KeepAliveConfig,
}

impl KeepAliveScheduler {
    pub fn new(config: KeepAliveConfig) -> Self {
        Self { config }
    }

    /// Run the timer until the hub goes away.
    ///
    /// The next delay is drawn before every sleep, so a failed cycle inside
    /// the hub never stops the heartbeat.
    pub fn spawn(self, hub: HubHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.config.interval_secs,
                jitter_secs = self.config.jitter_secs,
                "Keepalive scheduler started"
            );
            loop {
                let delay = next_delay(&self.config, &mut rand::rng());
                tracing::trace!(?delay, "Next keepalive");
                tokio::time::sleep(delay).await;

                if hub.keepalive_tick().await.is_err() {
                    tracing::debug!("Hub closed, keepalive scheduler exiting");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(interval: u64, jitter: u64, floor: u64) -> KeepAliveConfig {
        KeepAliveConfig {
            interval_secs: interval,
            jitter_secs: jitter,
            min_interval_secs: floor,
            ..KeepAliveConfig::default()
        }
    }

    #[test]
    fn delay_stays_within_jitter_band() {
        let cfg = config(60, 5, 15);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1000 {
            let d = next_delay(&cfg, &mut rng);
            assert!(d >= Duration::from_secs(55), "{d:?}");
            assert!(d <= Duration::from_secs(65), "{d:?}");
        }
    }

    #[test]
    fn delay_varies_between_draws() {
        let cfg = config(60, 5, 15);
        let mut rng = StdRng::seed_from_u64(42);

        let first = next_delay(&cfg, &mut rng);
        let differs = (0..20).any(|_| next_delay(&cfg, &mut rng) != first);
        assert!(differs);
    }

    #[test]
    fn floor_wins_over_large_jitter() {
        let cfg = config(10, 30, 8);
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..1000 {
            assert!(next_delay(&cfg, &mut rng) >= Duration::from_secs(8));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let cfg = config(60, 0, 15);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(next_delay(&cfg, &mut rng), Duration::from_secs(60));
    }

    #[test]
    fn silent_wav_layout() {
        let wav = silent_wav(Duration::from_millis(500), 8_000);

        assert_eq!(wav.len(), 44 + 8_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 8_000);
        assert!(wav[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn silent_wav_is_clipped_for_huge_durations() {
        let wav = silent_wav(Duration::from_secs(u32::MAX as u64), 8_000);

        assert_eq!(wav.len(), 44 + 160_000);
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 36 + 160_000);
    }
}
