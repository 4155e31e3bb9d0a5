// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The pluggable policy that chooses which of N streams carries each
//! request, and signals downgrade (spec §4.2).

pub mod fifo;
pub mod load;

use crate::error::SendError;
use crate::item::{CallerContext, StreamOutcome, WriteItem};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Identifies one slot in the stream fleet. Stable across stream
/// restarts — the same id always refers to the same [`crate::work_state::WorkState`].
pub type StreamId = usize;

/// A handle returned by [`Prioritizer::next_writer`], bound to use
/// exactly once (spec §4.2 "use the handle exactly once").
#[async_trait]
pub trait WriterHandle<P>: Send {
    /// Enqueues `item` on the chosen stream and waits for its
    /// completion, subject to the item's own caller context and the
    /// exporter's internal shutdown.
    ///
    /// Returns `Err(SendError::Cancelled)` only for caller-cancel or
    /// shutdown; all other internal signals resolve to
    /// `Ok(StreamOutcome::Restart)` so the sender retries transparently.
    async fn send_and_wait(
        self: Box<Self>,
        item: WriteItem<P>,
        completion: oneshot::Receiver<StreamOutcome>,
    ) -> Result<StreamOutcome, SendError>;
}

/// Common contract shared by the FIFO-ready and power-of-two-choices
/// variants (spec §4.2 "Common contract").
#[async_trait]
pub trait Prioritizer<P>: Send + Sync {
    /// Returns a writer handle to be used by the sender exactly once.
    ///
    /// `Ok(None)` means downgrade has fired: the sender must fall back
    /// externally. `Err` means caller-context cancellation or shutdown.
    async fn next_writer(
        &self,
        ctx: &CallerContext,
    ) -> Result<Option<Box<dyn WriterHandle<P>>>, SendError>;

    /// Marks the prioritizer permanently unavailable. Idempotent.
    /// Future `next_writer` calls return `Ok(None)`; any work already
    /// queued in intermediate channels is drained with
    /// [`StreamOutcome::Restart`] so in-flight senders re-enter their
    /// loop and observe the downgrade.
    fn downgrade(&self);

    /// Whether [`Prioritizer::downgrade`] has fired.
    fn is_downgraded(&self) -> bool;

    /// Waits for any background tasks this prioritizer owns (e.g. the
    /// power-of-two-choices variant's dispatch workers) to finish, so
    /// [`crate::sender::Sender::shutdown`] can guarantee no task spawned
    /// by the core remains running once it returns. No-op for variants
    /// that own no background tasks.
    async fn join(&self) {}

    /// Readiness notification: `stream` can accept one more item.
    /// No-op for variants that don't track readiness (power-of-two).
    fn set_ready(&self, _stream: StreamId) {}

    /// Readiness notification: `stream` should be removed from the
    /// ready set. No-op for variants that don't track readiness.
    fn unset_ready(&self, _stream: StreamId) {}
}
