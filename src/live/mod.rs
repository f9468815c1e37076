//! Live stream mirror
//!
//! While a broadcast is running its chunks can also be fed to an external
//! encoder that writes a rolling HLS playlist. The coordinator only sees the
//! [`LiveSink`] worker interface, so the encoder can be disabled, replaced,
//! or mocked in tests.

pub mod hls;

use bytes::Bytes;

pub use hls::HlsBridge;

/// Worker interface for the live mirror.
///
/// None of these calls may block or fail loudly: a dead encoder must never
/// disturb the relay or the broadcast lock.
pub trait LiveSink: Send {
    /// Begin a session. Idempotent while an encoder is already running.
    fn start(&mut self);

    /// Hand one chunk to the running encoder, dropping it if that is not possible.
    fn push(&mut self, chunk: &Bytes);

    /// End the session. Tolerates an encoder that is already gone.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Sink used when the mirror is turned off
#[derive(Debug, Default)]
pub struct DisabledSink;

impl LiveSink for DisabledSink {
    fn start(&mut self) {}

    fn push(&mut self, _chunk: &Bytes) {}

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}
