//! Per-call cancellation and deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a call context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEnd {
    /// Cancelled by the host or by server shutdown. Not an error.
    Cancelled,
    /// The deadline carried by the call passed.
    DeadlineExceeded,
}

/// Cancellation signal and optional deadline for one streaming call.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context that only ends when cancelled through [`CallContext::cancel`].
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Build a context for an incoming request, honouring its `grpc-timeout`
    /// header if present.
    pub fn for_request<T>(request: &tonic::Request<T>, cancel: CancellationToken) -> Self {
        let ctx = Self::new(cancel);
        match request
            .metadata()
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
        {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves when the call is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextEnd {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => ContextEnd::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextEnd::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                ContextEnd::Cancelled
            }
        }
    }
}

/// Parse a gRPC `grpc-timeout` header value: up to 8 digits followed by a
/// unit (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
