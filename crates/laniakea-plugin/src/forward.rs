//! Frame forwarding in both directions.
//!
//! Plugin side: [`pump_stream`] drains a [`FrameStream`] produced by plugin
//! logic into a [`FrameSink`] (the network) until the producer closes it, the
//! host cancels, or the call's deadline passes.
//!
//! Host side: [`open_stream`] turns an inbound server stream into a
//! [`FrameStream`], receiving the first element before returning so that
//! connection-level failures surface synchronously.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::Status;
use tracing::{debug, warn};

use crate::context::{CallContext, ContextEnd};
use laniakea_core::{Frame, FrameSender, FrameStream, LaniakeaError, Result};

/// The network end of a server-streamed response.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one frame. [`LaniakeaError::StreamClosed`] means the receiving
    /// peer has gone away; any other error is a transport fault.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Resolves once the receiving peer has gone away.
    async fn closed(&self);
}

/// A [`FrameSink`] feeding a tonic server-streaming response.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<std::result::Result<Frame, Status>>,
}

impl ChannelSink {
    /// Create a sink and the response stream tonic will serve from it.
    pub fn channel(
        capacity: usize,
    ) -> (ChannelSink, ReceiverStream<std::result::Result<Frame, Status>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelSink { tx }, ReceiverStream::new(rx))
    }

    /// Terminate the response with `status`. Best effort: the peer may
    /// already be gone.
    pub async fn fail(&self, status: Status) {
        let _ = self.tx.send(Err(status)).await;
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| LaniakeaError::StreamClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}

fn finish(end: ContextEnd, sent: u64) -> Result<u64> {
    match end {
        ContextEnd::Cancelled => {
            debug!(sent, "stream cancelled");
            Ok(sent)
        }
        ContextEnd::DeadlineExceeded => Err(LaniakeaError::DeadlineExceeded),
    }
}

/// Forward every frame of `stream` to `sink`, returning how many were sent.
///
/// Ends with `Ok` when the producer closes the stream, the host goes away,
/// or `ctx` is cancelled. Ends with an error on deadline expiry or when the
/// sink reports a transport fault; frames after the failing one are never
/// delivered.
pub async fn pump_stream<S>(mut stream: FrameStream, sink: &mut S, ctx: &CallContext) -> Result<u64>
where
    S: FrameSink + ?Sized,
{
    let mut sent = 0u64;
    loop {
        tokio::select! {
            biased;
            end = ctx.done() => return finish(end, sent),
            _ = sink.closed() => {
                debug!(sent, "host went away");
                return Ok(sent);
            }
            next = stream.recv() => {
                let Some(frame) = next else {
                    debug!(sent, "producer closed stream");
                    return Ok(sent);
                };
                tokio::select! {
                    biased;
                    end = ctx.done() => return finish(end, sent),
                    result = sink.send(frame) => match result {
                        Ok(()) => sent += 1,
                        Err(LaniakeaError::StreamClosed) => {
                            debug!(sent, "host went away");
                            return Ok(sent);
                        }
                        Err(e) => return Err(e),
                    },
                }
            }
        }
    }
}

/// Open a host-side [`FrameStream`] over an inbound server stream.
///
/// The first element is received before returning: an error there is
/// returned as is, and an immediately-ended stream yields
/// [`LaniakeaError::EndOfStream`]. Otherwise the first frame and everything
/// after it are relayed, in order, by a task owned by the returned stream.
/// A mid-stream error closes the stream; it is logged but not delivered.
pub async fn open_stream<S>(mut inbound: S, capacity: usize) -> Result<FrameStream>
where
    S: Stream<Item = std::result::Result<Frame, Status>> + Send + Unpin + 'static,
{
    let first = match inbound.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(status)) => return Err(status.into()),
        None => return Err(LaniakeaError::EndOfStream),
    };
    let (tx, stream) = FrameStream::channel(capacity);
    tx.send(first).await?;
    let relay = tokio::spawn(relay(inbound, tx));
    Ok(stream.with_forwarder(relay))
}

async fn relay<S>(mut inbound: S, mut tx: FrameSender)
where
    S: Stream<Item = std::result::Result<Frame, Status>> + Send + Unpin,
{
    let mut relayed = 1u64;
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(relayed, "reader dropped, abandoning stream");
                break;
            }
            item = inbound.next() => match item {
                Some(Ok(frame)) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                    relayed += 1;
                }
                Some(Err(status)) => {
                    warn!(code = ?status.code(), message = status.message(), relayed, "stream ended with error");
                    break;
                }
                None => {
                    debug!(relayed, "stream completed");
                    break;
                }
            }
        }
    }
    tx.close();
}

/// Forwarding tasks of one plugin-side service.
///
/// Every streaming call runs on its own tracked task so that `Stop` can
/// wait for them. Calls get a child of the shared shutdown token.
#[derive(Debug)]
pub(crate) struct StreamTasks {
    tracker: TaskTracker,
    shutdown: CancellationToken,
    capacity: usize,
    grace: Duration,
}

impl StreamTasks {
    pub(crate) fn new(capacity: usize, grace: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            capacity,
            grace,
        }
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub(crate) fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Context for a new streaming call. Fails once `drain` has started.
    pub(crate) fn context_for<T>(&self, request: &tonic::Request<T>) -> Result<CallContext> {
        if self.tracker.is_closed() {
            return Err(LaniakeaError::Stopped);
        }
        Ok(CallContext::for_request(request, self.shutdown.child_token()))
    }

    pub(crate) fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn the forwarding loop for `stream` and return the response stream
    /// tonic should serve.
    pub(crate) fn forward(
        &self,
        rpc: &'static str,
        stream: FrameStream,
        ctx: CallContext,
    ) -> ReceiverStream<std::result::Result<Frame, Status>> {
        let (mut sink, outbound) = ChannelSink::channel(self.capacity);
        self.tracker.spawn(async move {
            match pump_stream(stream, &mut sink, &ctx).await {
                Ok(sent) => debug!(rpc, sent, "stream finished"),
                Err(e) => {
                    warn!(rpc, error = %e, "stream aborted");
                    sink.fail(e.into()).await;
                }
            }
        });
        outbound
    }

    /// Wait for in-flight streams to finish, cancelling whatever is still
    /// running once the grace period is over.
    pub(crate) async fn drain(&self) {
        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                active = self.tracker.len(),
                "streams still running after grace period, cancelling"
            );
            self.shutdown.cancel();
            self.tracker.wait().await;
        }
    }
}
