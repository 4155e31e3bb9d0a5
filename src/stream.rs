// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! One bidirectional RPC instance: writer and reader (spec §4.4) plus
//! the Connecting → Running → Draining → Terminated state machine
//! (spec §4.3).

use crate::error::{PeerErrorKind, SendError};
use crate::item::{BatchId, StreamOutcome, WriteItem};
use crate::prioritizer::{Prioritizer, StreamId};
use crate::producer::Producer;
use crate::transport::{BidiTransport, PeerOutcome, RecvErrorKind, TransportSink, TransportSource};
use crate::work_state::WorkState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What [`run`] hands back to the manager when a stream ends.
pub(crate) struct StreamReturn<P> {
    pub id: StreamId,
    pub work_state: Arc<WorkState<P>>,
    /// True if the bidirectional RPC was ever established *and* its
    /// first response was not "unsupported" — i.e. the manager should
    /// simply restart this slot rather than count it against the
    /// downgrade threshold (spec §4.3).
    pub established: bool,
}

/// Runs one stream instance end to end: connect, spawn the writer, run
/// the reader in the calling task, then reconcile and hand the slot's
/// work state back to the manager.
pub(crate) async fn run<P, T, Pr>(
    id: StreamId,
    work_state: Arc<WorkState<P>>,
    prioritizer: Arc<dyn Prioritizer<P>>,
    producer: Pr,
    transport_config: Arc<T::Config>,
    lifetime: Duration,
    downgrade_scope: CancellationToken,
) -> StreamReturn<P>
where
    P: Send + 'static,
    T: BidiTransport<Batch = Pr::Batch>,
    Pr: Producer<P> + Send + 'static,
{
    let transport = match T::connect(&transport_config).await {
        Ok(t) => t,
        Err(e) => {
            warn!(stream = id, error = %e, "cannot start arrow stream");
            return StreamReturn {
                id,
                work_state,
                established: false,
            };
        }
    };
    debug!(stream = id, "arrow stream established");

    let (sink, source) = transport.split();
    // Per-stream context: child of the downgrade-scoped context, so a
    // downgrade (or shutdown, further up the chain) tears every live
    // stream down without each needing its own cancellation plumbing.
    let stream_ctx = downgrade_scope.child_token();
    let receiver = work_state.take_receiver();

    let writer_ctx = stream_ctx.clone();
    let writer_work_state = Arc::clone(&work_state);
    let writer_prioritizer = Arc::clone(&prioritizer);
    let writer_join = tokio::spawn(writer_loop::<P, T, Pr>(
        id,
        writer_work_state,
        writer_prioritizer,
        producer,
        sink,
        receiver,
        lifetime,
        writer_ctx,
    ));

    let reader_outcome =
        reader_loop(id, Arc::clone(&work_state), source, stream_ctx.clone()).await;
    // Make sure the writer unblocks even if it was the reader that
    // detected the failure (e.g. unsupported-protocol, recv error).
    stream_ctx.cancel();
    prioritizer.unset_ready(id);

    let receiver = match writer_join.await {
        Ok(receiver) => receiver,
        Err(join_err) => {
            warn!(stream = id, error = %join_err, "writer task ended unexpectedly");
            // The original receiver is gone with the panicked task;
            // hand back a fresh, empty one so the slot stays usable.
            mpsc::channel(1).1
        }
    };
    work_state.return_receiver(receiver);

    // Whatever is still queued or awaiting a response belongs to no
    // live stream now; the replacement (or downgrade) picks it up.
    work_state.drain_pending_input();
    work_state.waiters.drain_with(|| StreamOutcome::Restart);

    StreamReturn {
        id,
        work_state,
        established: !matches!(reader_outcome, ReaderOutcome::Unsupported),
    }
}

/// Writer half: encodes and transmits items in the order they arrive
/// from the work state's input channel (spec §4.4 "Writer loop").
async fn writer_loop<P, T, Pr>(
    id: StreamId,
    work_state: Arc<WorkState<P>>,
    prioritizer: Arc<dyn Prioritizer<P>>,
    mut producer: Pr,
    mut sink: T::Sink,
    mut receiver: mpsc::Receiver<WriteItem<P>>,
    lifetime: Duration,
    ctx: CancellationToken,
) -> mpsc::Receiver<WriteItem<P>>
where
    P: Send + 'static,
    T: BidiTransport<Batch = Pr::Batch>,
    Pr: Producer<P>,
{
    // `lifetime == 0` means "no expiry" (spec §8 boundary behavior); a
    // very long sleep achieves that without pulling in an extra
    // dependency for an optional timer future.
    let timer_duration = if lifetime.is_zero() {
        Duration::from_secs(u64::MAX / 2)
    } else {
        lifetime
    };
    let lifetime_timer = tokio::time::sleep(timer_duration);
    tokio::pin!(lifetime_timer);

    let mut next_batch_id: u64 = 0;

    loop {
        // Re-announce readiness for the next item; a no-op under the
        // load prioritizer (spec §4.2.1 "on completion of a send, it
        // re-posts itself as ready").
        prioritizer.set_ready(id);

        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                // Return without close-send; abort (spec §4.4 step 4).
                return receiver;
            }
            () = &mut lifetime_timer => {
                debug!(stream = id, "stream lifetime expired, closing send side");
                sink.close_send().await;
                return receiver;
            }
            item = receiver.recv() => {
                let Some(item) = item else {
                    // Work state torn down from under us.
                    return receiver;
                };
                let metadata = item.metadata;
                let completion = item.completion;
                match producer.produce(item.payload) {
                    Ok(batch) => {
                        let batch_id = BatchId(next_batch_id);
                        next_batch_id += 1;
                        // Insert before transmit so the reader can
                        // never observe a batch id with no waiter
                        // (spec §3 invariant ordering).
                        work_state.waiters.insert(batch_id, completion);
                        if let Err(e) = sink.send(batch, &metadata).await {
                            warn!(stream = id, error = %e, "transport send failed");
                            if let Some(waiter) = work_state.waiters.remove(batch_id) {
                                let _ = waiter.send(StreamOutcome::Restart);
                            }
                            ctx.cancel();
                            return receiver;
                        }
                    }
                    Err(e) => {
                        // Encoder failure happens before a batch id is
                        // assigned; reply directly (spec §7
                        // "Encoder-failure: fatal to the stream only").
                        warn!(stream = id, error = %e, "failed to encode payload");
                        let _ = completion.send(StreamOutcome::Restart);
                        ctx.cancel();
                        return receiver;
                    }
                }
            }
        }
    }
}

/// Reader half: translates peer responses into completions keyed by
/// batch identifier (spec §4.4 "Reader loop").
async fn reader_loop<P, S>(
    id: StreamId,
    work_state: Arc<WorkState<P>>,
    mut source: S,
    ctx: CancellationToken,
) -> ReaderOutcome
where
    S: TransportSource,
{
    let mut first_receive = true;
    loop {
        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                return ReaderOutcome::Ended;
            }
            res = source.recv() => {
                match res {
                    Ok(None) => {
                        // Clean end-of-stream: fan out restart to
                        // whatever is still registered.
                        return ReaderOutcome::Ended;
                    }
                    Ok(Some(status)) => {
                        first_receive = false;
                        deliver_status(&work_state, status);
                    }
                    Err(e) => {
                        if first_receive && e.is_unsupported() {
                            debug!(stream = id, "arrow is not supported by peer");
                            return ReaderOutcome::Unsupported;
                        }
                        warn!(stream = id, error = %e, "transport receive failed");
                        return ReaderOutcome::Ended;
                    }
                }
            }
        }
    }
}

fn deliver_status<P>(work_state: &Arc<WorkState<P>>, status: crate::transport::BatchStatus) {
    let Some(waiter) = work_state.waiters.remove(BatchId(status.batch_id)) else {
        // Already removed (e.g. caller-context cancellation raced the
        // response) — nothing to deliver to.
        return;
    };
    let outcome = match status.outcome {
        PeerOutcome::Ok => StreamOutcome::Delivered(Ok(())),
        PeerOutcome::StreamShutdown => StreamOutcome::Restart,
        PeerOutcome::Retryable(message) => StreamOutcome::Delivered(Err(SendError::Peer {
            kind: PeerErrorKind::Retryable,
            message,
        })),
        PeerOutcome::Permanent(message) => StreamOutcome::Delivered(Err(SendError::Peer {
            kind: PeerErrorKind::Permanent,
            message,
        })),
        PeerOutcome::Unknown { code, message } => {
            StreamOutcome::Delivered(Err(SendError::UnknownStatus { code, message }))
        }
    };
    let _ = waiter.send(outcome);
}

enum ReaderOutcome {
    Ended,
    Unsupported,
}
