// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The re-usable per-slot holder of a stream's input channel and its
//! waiters map (spec §3 "Work state", §4.5).
//!
//! Survives stream restarts: the manager hands the same [`WorkState`] to
//! each replacement stream instance, so items already queued and
//! waiters already registered are picked up transparently.

use crate::item::{BatchId, StreamOutcome, WriteItem};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Capacity of a work state's input channel. Spec §3 notes "size one is
/// sufficient": the prioritizer itself provides the queuing; a deeper
/// channel here would only hide backpressure.
const INPUT_CHANNEL_CAPACITY: usize = 1;

/// Per-stream mapping from batch identifier to the completion channel of
/// the caller awaiting that identifier's response. Mutated only under
/// `waiters`'s lock; never held across an `.await`.
pub(crate) struct Waiters {
    inner: Mutex<HashMap<BatchId, oneshot::Sender<StreamOutcome>>>,
}

impl Waiters {
    fn new() -> Self {
        Waiters {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter for `id`. Invariant: a batch identifier is
    /// never reused while its waiter entry is present, so this never
    /// overwrites a live entry.
    pub(crate) fn insert(&self, id: BatchId, completion: oneshot::Sender<StreamOutcome>) {
        let previous = self.inner.lock().insert(id, completion);
        debug_assert!(previous.is_none(), "batch id {id} reused while live");
    }

    /// Removes and returns the waiter for `id`, if still present.
    pub(crate) fn remove(&self, id: BatchId) -> Option<oneshot::Sender<StreamOutcome>> {
        self.inner.lock().remove(&id)
    }

    /// Drains all waiters, delivering `outcome` to each. Used at
    /// end-of-stream and on teardown so no caller is left hanging.
    pub(crate) fn drain_with(&self, outcome: impl Fn() -> StreamOutcome) {
        let drained: Vec<_> = self.inner.lock().drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(outcome());
        }
    }

    /// Current number of registered waiters — an approximation of
    /// "pending requests" used by the load prioritizer's heuristic.
    /// Observed non-atomically with respect to other mutations; that's
    /// acceptable, the heuristic is best-effort (spec §4.2.2).
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Per-slot work state: one bounded input channel plus one waiters map.
/// Lives longer than any single [`crate::stream::Stream`] instance.
pub struct WorkState<P> {
    pub(crate) sender: mpsc::Sender<WriteItem<P>>,
    pub(crate) receiver: Mutex<Option<mpsc::Receiver<WriteItem<P>>>>,
    pub(crate) waiters: Waiters,
}

impl<P> WorkState<P> {
    /// Creates a fresh work state with an empty input channel and no
    /// registered waiters.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        Arc::new(WorkState {
            sender,
            receiver: Mutex::new(Some(receiver)),
            waiters: Waiters::new(),
        })
    }

    /// Takes ownership of the input channel's receiving half for a new
    /// stream instance to drive. Only one stream may hold it live at a
    /// time (spec invariant: "a work state is attached to exactly one
    /// live stream at a time"); a replacement stream calls this again
    /// once the prior one has returned its receiver via
    /// [`WorkState::return_receiver`].
    pub(crate) fn take_receiver(&self) -> mpsc::Receiver<WriteItem<P>> {
        self.receiver
            .lock()
            .take()
            .expect("work state receiver taken by two live streams simultaneously")
    }

    /// Returns the receiver so the next stream instance over this slot
    /// can take it.
    pub(crate) fn return_receiver(&self, receiver: mpsc::Receiver<WriteItem<P>>) {
        *self.receiver.lock() = Some(receiver);
    }

    /// A clone of the input channel's sending half, used by
    /// prioritizers to enqueue items.
    pub(crate) fn sender(&self) -> mpsc::Sender<WriteItem<P>> {
        self.sender.clone()
    }

    /// Number of requests currently awaiting a response on this slot.
    pub(crate) fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    /// Best-effort drain of a leftover item sitting in the input
    /// channel while no stream currently owns the receiver (spec §4.5
    /// "known hazard": an item queued for a slot that terminated before
    /// a replacement took over). Replies `Restart` to anything found.
    ///
    /// Does nothing if a live stream currently holds the receiver —
    /// that stream's own teardown path is responsible for draining it.
    pub(crate) fn drain_pending_input(&self) {
        if let Some(receiver) = self.receiver.lock().as_mut() {
            while let Ok(item) = receiver.try_recv() {
                let _ = item.completion.send(StreamOutcome::Restart);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_round_trips() {
        let ws = WorkState::<()>::new();
        let (tx, rx) = oneshot::channel();
        ws.waiters.insert(BatchId(1), tx);
        assert_eq!(ws.waiters.len(), 1);
        let waiter = ws.waiters.remove(BatchId(1)).expect("waiter present");
        let _ = waiter.send(StreamOutcome::Delivered(Ok(())));
        let outcome = rx.await.expect("completion delivered");
        assert!(matches!(outcome, StreamOutcome::Delivered(Ok(()))));
        assert_eq!(ws.waiters.len(), 0);
    }

    #[tokio::test]
    async fn drain_delivers_restart_to_all() {
        let ws = WorkState::<()>::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        ws.waiters.insert(BatchId(1), tx1);
        ws.waiters.insert(BatchId(2), tx2);
        ws.waiters.drain_with(|| StreamOutcome::Restart);
        assert!(matches!(rx1.await.unwrap(), StreamOutcome::Restart));
        assert!(matches!(rx2.await.unwrap(), StreamOutcome::Restart));
        assert_eq!(ws.waiters.len(), 0);
    }

    #[test]
    fn receiver_round_trips_across_restart() {
        let ws = WorkState::<()>::new();
        let rx = ws.take_receiver();
        ws.return_receiver(rx);
        let _ = ws.take_receiver();
    }
}
