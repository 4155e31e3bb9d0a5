// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The unit of work handed from the sender façade down into a stream
//! (spec §3 "Request item (write-item)").

use crate::error::SendError;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A monotonically increasing per-stream identifier assigned by the
/// writer just before transmission. Unique per stream, not globally;
/// paired with the owning stream to correlate a response.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The caller's deadline and cancellation, carried alongside a
/// [`WriteItem`] and observed at every suspension point (spec §5
/// "Cancellation and timeouts").
#[derive(Debug, Clone)]
pub struct CallerContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl CallerContext {
    /// A context with no deadline, canceled only via `cancellation`.
    #[must_use]
    pub fn new(cancellation: CancellationToken) -> Self {
        CallerContext {
            cancellation,
            deadline: None,
        }
    }

    /// Attaches a deadline to this context.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A context that is already canceled, for the "caller context
    /// already canceled at entry" boundary case (spec §8).
    #[must_use]
    pub fn already_cancelled() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        CallerContext::new(token)
    }

    /// Resolves once this context is done, whether by explicit
    /// cancellation or deadline expiry.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancellation.cancelled() => {}
                    () = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            None => self.cancellation.cancelled().await,
        }
    }

    /// True without waiting, for fast-path checks before doing any work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// The final result of one attempt to deliver a payload to the peer.
pub type SendResult = Result<(), SendError>;

/// What a [`WriteItem`]'s completion channel ultimately carries.
///
/// `Restart` is the internal-only "stream-restarting" sentinel of
/// spec §7: it means the stream that owned this item broke (or is
/// draining with this item still unsent) and the sender should
/// transparently retry on a fresh stream. It is never surfaced past
/// [`crate::sender::Sender::send_and_wait`] — a tagged variant, per
/// spec §9, not a string-matched error.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The item reached a final outcome: delivered and acknowledged,
    /// rejected by the peer, or failed to encode.
    Delivered(SendResult),
    /// Retry on a fresh stream; this attempt was not acknowledged.
    Restart,
}

/// The unit of work handed by the sender to a stream (spec §3).
///
/// The completion channel has capacity one: a writer or reader can
/// always deliver a final result without blocking.
pub struct WriteItem<P> {
    /// The caller's payload, opaque to this crate.
    pub payload: P,
    /// Metadata headers to attach to the outgoing batch.
    pub metadata: HashMap<String, String>,
    /// Informational-only uncompressed size hint.
    pub uncompressed_size: usize,
    /// The caller's deadline/cancellation.
    pub ctx: CallerContext,
    /// Single-use completion channel.
    pub completion: oneshot::Sender<StreamOutcome>,
}

impl<P> fmt::Debug for WriteItem<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteItem")
            .field("uncompressed_size", &self.uncompressed_size)
            .field("metadata_keys", &self.metadata.len())
            .finish_non_exhaustive()
    }
}
