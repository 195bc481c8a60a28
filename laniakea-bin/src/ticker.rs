use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use laniakea_core::{
    DEFAULT_STREAM_CAPACITY, Frame, FrameSender, FrameStream, LaniakeaError, Result, VersionGate,
};
use laniakea_plugin::{Controller, Versioned};

use crate::producer::Producer;

pub const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Commands understood by [`TickerController`], sent as JSON frames.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TickerCommand {
    Ping,
    Start { interval_ms: u64 },
    Stop,
}

impl TickerCommand {
    pub fn parse(frame: &Frame) -> Result<Self> {
        if frame.content_type() != JSON_CONTENT_TYPE {
            return Err(LaniakeaError::InvalidCommand(format!(
                "expected {JSON_CONTENT_TYPE}, got '{}'",
                frame.content_type()
            )));
        }
        serde_json::from_slice(&frame.payload).map_err(|e| LaniakeaError::InvalidCommand(e.to_string()))
    }
}

/// Answers `ping`, and streams ticks between `start` and `stop`.
pub struct TickerController {
    name: String,
    gate: VersionGate,
    buffer: usize,
    ticking: Mutex<Option<Producer>>,
}

impl TickerController {
    pub fn new(name: impl Into<String>, gate: VersionGate) -> Self {
        Self {
            name: name.into(),
            gate,
            buffer: DEFAULT_STREAM_CAPACITY,
            ticking: Mutex::new(None),
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    fn reply(&self, text: &str) -> FrameStream {
        FrameStream::from_frames(vec![Frame::new(&self.name, TEXT_CONTENT_TYPE, text)])
    }

    fn start(&self, interval: Duration) -> Result<FrameStream> {
        let mut ticking = self.ticking.lock();
        if ticking.as_ref().is_some_and(Producer::is_running) {
            return Err(LaniakeaError::AlreadyRecording);
        }
        let (tx, stream) = FrameStream::channel(self.buffer);
        let source = self.name.clone();
        *ticking = Some(Producer::spawn(move |cancel| tick(source, interval, tx, cancel)));
        info!(interval_ms = interval.as_millis() as u64, "ticker started");
        Ok(stream)
    }
}

impl Versioned for TickerController {
    fn version_gate(&self) -> &VersionGate {
        &self.gate
    }
}

#[async_trait]
impl Controller for TickerController {
    async fn command(&self, frame: Frame) -> Result<FrameStream> {
        let command = TickerCommand::parse(&frame)?;
        debug!(?command, "ticker command");
        match command {
            TickerCommand::Ping => Ok(self.reply("pong")),
            TickerCommand::Start { interval_ms } => {
                self.start(Duration::from_millis(interval_ms.max(1)))
            }
            TickerCommand::Stop => {
                let ticking = self.ticking.lock().take();
                match ticking {
                    Some(producer) if producer.is_running() => {
                        producer.stop().await;
                        info!("ticker stopped");
                        Ok(self.reply("stopped"))
                    }
                    _ => Err(LaniakeaError::NotRecording),
                }
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        let ticking = self.ticking.lock().take();
        if let Some(producer) = ticking {
            producer.stop().await;
        }
        Ok(())
    }
}

async fn tick(source: String, interval: Duration, mut tx: FrameSender, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    let mut n = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            _ = ticker.tick() => {
                let payload = serde_json::json!({ "tick": n }).to_string();
                let frame = Frame::new(&source, JSON_CONTENT_TYPE, payload);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                        n += 1;
                    }
                }
            }
        }
    }
    tx.close();
    debug!(ticks = n, "ticker finished");
}
