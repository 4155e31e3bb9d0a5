// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FIFO-ready prioritizer (spec §4.2.1): a single channel of "stream is
//! ready for one item" tokens, refilled by each stream's writer after
//! every completed send.

use super::{Prioritizer, StreamId, WriterHandle};
use crate::error::SendError;
use crate::item::{CallerContext, StreamOutcome, WriteItem};
use crate::work_state::WorkState;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// FIFO-ready prioritizer over a fixed fleet of streams.
pub struct FifoPrioritizer<P> {
    streams: Vec<Arc<WorkState<P>>>,
    shutdown: CancellationToken,
    downgraded: AtomicBool,
    ready_tx: parking_lot::Mutex<Option<mpsc::Sender<StreamId>>>,
    ready_rx: AsyncMutex<mpsc::Receiver<StreamId>>,
}

impl<P: Send + 'static> FifoPrioritizer<P> {
    /// Builds a prioritizer over `streams`, one ready slot per stream.
    #[must_use]
    pub fn new(streams: Vec<Arc<WorkState<P>>>, shutdown: CancellationToken) -> Arc<Self> {
        let capacity = streams.len().max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(FifoPrioritizer {
            streams,
            shutdown,
            downgraded: AtomicBool::new(false),
            ready_tx: parking_lot::Mutex::new(Some(tx)),
            ready_rx: AsyncMutex::new(rx),
        })
    }
}

#[async_trait]
impl<P: Send + 'static> Prioritizer<P> for FifoPrioritizer<P> {
    async fn next_writer(
        &self,
        ctx: &CallerContext,
    ) -> Result<Option<Box<dyn WriterHandle<P>>>, SendError> {
        if self.is_downgraded() {
            return Ok(None);
        }
        let mut rx = self.ready_rx.lock().await;
        tokio::select! {
            () = ctx.cancelled() => Err(SendError::Cancelled),
            () = self.shutdown.cancelled() => Err(SendError::Cancelled),
            token = rx.recv() => match token {
                Some(id) => Ok(Some(Box::new(FifoWriterHandle {
                    work_state: Arc::clone(&self.streams[id]),
                    shutdown: self.shutdown.clone(),
                }) as Box<dyn WriterHandle<P>>)),
                // Sentinel "closed": downgrade.
                None => Ok(None),
            },
        }
    }

    fn downgrade(&self) {
        if self.downgraded.swap(true, Ordering::AcqRel) {
            return; // idempotent
        }
        if let Some(tx) = self.ready_tx.lock().take() {
            drop(tx);
        }
        // Drain anything already queued behind the closed channel so
        // no consumer can ever receive a stale token again, and reply
        // Restart to whatever those streams' input channels are still
        // holding so in-flight senders observe the downgrade promptly.
        if let Ok(mut rx) = self.ready_rx.try_lock() {
            while let Ok(id) = rx.try_recv() {
                if let Some(ws) = self.streams.get(id) {
                    ws.drain_pending_input();
                }
            }
        }
    }

    fn is_downgraded(&self) -> bool {
        self.downgraded.load(Ordering::Acquire)
    }

    fn set_ready(&self, stream: StreamId) {
        if self.is_downgraded() {
            return;
        }
        if let Some(tx) = self.ready_tx.lock().as_ref() {
            let _ = tx.try_send(stream);
        }
    }

    fn unset_ready(&self, stream: StreamId) {
        if self.is_downgraded() {
            return;
        }
        let Some(tx) = self.ready_tx.lock().clone() else {
            return;
        };
        let mut found = false;
        if let Ok(mut rx) = self.ready_rx.try_lock() {
            let mut drained = Vec::new();
            while let Ok(tok) = rx.try_recv() {
                drained.push(tok);
            }
            for tok in drained {
                if !found && tok == stream {
                    found = true;
                    continue;
                }
                let _ = tx.try_send(tok);
            }
        }
        if !found {
            // The ready token for `stream` was already handed out to a
            // concurrent next_writer call that pushed work directly
            // into this stream's input channel. That item has no
            // owner once this stream tears down; drain it with Restart
            // (spec §4.5 known hazard, §4.2.1 "replies with the
            // stream-restarting signal").
            if let Some(ws) = self.streams.get(stream) {
                ws.drain_pending_input();
            }
        }
    }
}

struct FifoWriterHandle<P> {
    work_state: Arc<WorkState<P>>,
    shutdown: CancellationToken,
}

#[async_trait]
impl<P: Send + 'static> WriterHandle<P> for FifoWriterHandle<P> {
    async fn send_and_wait(
        self: Box<Self>,
        item: WriteItem<P>,
        completion: oneshot::Receiver<StreamOutcome>,
    ) -> Result<StreamOutcome, SendError> {
        let ctx = item.ctx.clone();
        let sender = self.work_state.sender();
        tokio::select! {
            () = ctx.cancelled() => return Err(SendError::Cancelled),
            () = self.shutdown.cancelled() => return Err(SendError::Cancelled),
            send_res = sender.send(item) => {
                if send_res.is_err() {
                    // Work state's receiver is gone: exporter is tearing
                    // down. Treat like shutdown.
                    return Err(SendError::Cancelled);
                }
            }
        }
        tokio::select! {
            () = ctx.cancelled() => Err(SendError::Cancelled),
            () = self.shutdown.cancelled() => Err(SendError::Cancelled),
            res = completion => match res {
                Ok(outcome) => Ok(outcome),
                // The writer/reader dropped the completion sender
                // without replying (stream crashed mid-flight). Retry
                // rather than surface an error the caller never caused.
                Err(_) => Ok(StreamOutcome::Restart),
            },
        }
    }
}
