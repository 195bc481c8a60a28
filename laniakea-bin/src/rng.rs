use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use laniakea_core::{
    DEFAULT_STREAM_CAPACITY, Frame, FrameSender, FrameStream, LaniakeaError, Result, VersionGate,
};
use laniakea_plugin::{Datasource, Versioned};

use crate::producer::Producer;

pub const RNG_CONTENT_TYPE: &str = "application/octet-stream";

/// Emits one frame of 8 random bytes per interval while recording.
pub struct RngDatasource {
    name: String,
    gate: VersionGate,
    interval: Duration,
    buffer: usize,
    recording: Mutex<Option<Producer>>,
}

impl RngDatasource {
    pub fn new(name: impl Into<String>, gate: VersionGate, interval: Duration) -> Self {
        Self {
            name: name.into(),
            gate,
            interval,
            buffer: DEFAULT_STREAM_CAPACITY,
            recording: Mutex::new(None),
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

impl Versioned for RngDatasource {
    fn version_gate(&self) -> &VersionGate {
        &self.gate
    }
}

#[async_trait]
impl Datasource for RngDatasource {
    async fn start_record(&self) -> Result<FrameStream> {
        let mut recording = self.recording.lock();
        if recording.as_ref().is_some_and(Producer::is_running) {
            return Err(LaniakeaError::AlreadyRecording);
        }
        let (tx, stream) = FrameStream::channel(self.buffer);
        let source = self.name.clone();
        let interval = self.interval;
        *recording = Some(Producer::spawn(move |cancel| {
            emit_random(source, interval, tx, cancel)
        }));
        info!(interval_ms = interval.as_millis() as u64, "rng recording started");
        Ok(stream)
    }

    async fn stop_record(&self) -> Result<()> {
        let recording = self.recording.lock().take();
        match recording {
            Some(producer) if producer.is_running() => {
                producer.stop().await;
                info!("rng recording stopped");
                Ok(())
            }
            _ => Err(LaniakeaError::NotRecording),
        }
    }

    async fn stop(&self) -> Result<()> {
        let recording = self.recording.lock().take();
        if let Some(producer) = recording {
            producer.stop().await;
        }
        Ok(())
    }
}

async fn emit_random(
    source: String,
    interval: Duration,
    mut tx: FrameSender,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut emitted = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => {
                debug!("reader gone");
                break;
            }
            _ = ticker.tick() => {
                let frame = Frame::new(&source, RNG_CONTENT_TYPE, rand::random::<u64>().to_le_bytes());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                        emitted += 1;
                    }
                }
            }
        }
    }
    tx.close();
    debug!(emitted, "rng producer finished");
}
