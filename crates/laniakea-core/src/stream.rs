//! Single-producer, single-consumer frame streams.
//!
//! A [`FrameStream`] is what plugin logic hands to the bridge and what the
//! bridge hands to host code. The queue between the two ends is bounded: a
//! producer that outruns its consumer suspends in [`FrameSender::send`]
//! until there is room again. Frames are never dropped or reordered.
//!
//! Closing is signalled only by the channel ending. Once the sender has been
//! closed (or dropped) the stream yields every frame that was already queued
//! and then `None`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{LaniakeaError, Result};
use laniakea_proto::Frame;

/// Queue depth used when no explicit capacity is configured.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Write end of a frame stream.
#[derive(Debug)]
pub struct FrameSender {
    tx: Option<mpsc::Sender<Frame>>,
}

/// Read end of a frame stream.
///
/// When the stream was opened by the host-side bridge it also owns the task
/// relaying frames from the network; dropping the stream aborts that task.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
    forwarder: Option<JoinHandle<()>>,
}

impl FrameStream {
    /// Create a connected sender/stream pair with room for `capacity` frames.
    ///
    /// A capacity of zero is raised to one.
    pub fn channel(capacity: usize) -> (FrameSender, FrameStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            FrameSender { tx: Some(tx) },
            FrameStream {
                rx,
                forwarder: None,
            },
        )
    }

    /// A finite stream that yields `frames` in order and then ends.
    pub fn from_frames(frames: Vec<Frame>) -> FrameStream {
        let (tx, stream) = Self::channel(frames.len());
        if let Some(inner) = &tx.tx {
            for frame in frames {
                // Capacity equals the number of frames, so this cannot be full.
                let _ = inner.try_send(frame);
            }
        }
        stream
    }

    /// Attach the task that feeds this stream. It is aborted when the stream
    /// is dropped.
    pub fn with_forwarder(mut self, handle: JoinHandle<()>) -> Self {
        self.forwarder = Some(handle);
        self
    }

    /// Receive the next frame, or `None` once the producer has closed the
    /// stream and everything queued has been delivered.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Stop accepting new frames. Frames already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Whether the producer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl FrameSender {
    /// Queue a frame, suspending while the stream is full.
    ///
    /// Fails with [`LaniakeaError::StreamClosed`] once either end has closed.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(frame).await.map_err(|_| LaniakeaError::StreamClosed),
            None => Err(LaniakeaError::StreamClosed),
        }
    }

    /// Close the write end. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.tx.take();
    }

    /// Whether this sender can no longer deliver frames.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    /// Resolves once the reading side is gone (or this sender was closed).
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn frame(n: i64) -> Frame {
        Frame::new("test", "text/plain", n.to_string()).with_timestamp(n)
    }

    #[tokio::test]
    async fn preserves_order_then_ends() {
        let (mut tx, mut rx) = FrameStream::channel(4);
        for n in 0..3 {
            tx.send(frame(n)).await.unwrap();
        }
        tx.close();
        for n in 0..3 {
            assert_eq!(rx.recv().await.unwrap().timestamp, n);
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn double_close_is_noop() {
        let (mut tx, mut rx) = FrameStream::channel(1);
        tx.close();
        tx.close();
        assert!(tx.is_closed());
        assert!(matches!(tx.send(frame(1)).await, Err(LaniakeaError::StreamClosed)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_fails_after_reader_dropped() {
        let (tx, rx) = FrameStream::channel(1);
        drop(rx);
        tx.closed().await;
        assert!(tx.is_closed());
        assert!(tx.send(frame(1)).await.is_err());
    }

    #[tokio::test]
    async fn from_frames_is_finite() {
        let stream = FrameStream::from_frames(vec![frame(1), frame(2)]);
        let got: Vec<i64> = stream.map(|f| f.timestamp).collect().await;
        assert_eq!(got, vec![1, 2]);
    }

    #[tokio::test]
    async fn from_frames_empty_ends_immediately() {
        let mut stream = FrameStream::from_frames(Vec::new());
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_stream_aborts_forwarder() {
        let (_tx, stream) = FrameStream::channel(1);
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        drop(stream.with_forwarder(handle));
        // The sender half is dropped only when the task is torn down.
        assert!(alive_rx.await.is_err());
    }
}
