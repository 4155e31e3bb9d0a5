// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The public façade: `start`, `send_and_wait`, `shutdown` (spec §4.1).

use crate::config::Config;
use crate::error::SendError;
use crate::item::{CallerContext, StreamOutcome, WriteItem};
use crate::manager::StreamManager;
use crate::prioritizer::{Prioritizer, fifo::FifoPrioritizer, load::LoadPrioritizer};
use crate::producer::ProducerFactory;
use crate::transport::BidiTransport;
use crate::work_state::WorkState;
use crate::config::PrioritizerKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Whether a payload reached the peer, and with what result.
///
/// Mirrors spec §4.1's `(sent, err)` pair exactly as a 4-way split:
/// - `Sent(Ok(()))` — `(true, nil)`: the peer acknowledged success.
/// - `Sent(Err(e))` — `(true, non-nil)`: the peer replied with an error
///   applicable to this payload; the caller may apply its own retry policy.
/// - `NotSent` — `(false, nil)`: the streaming protocol is unavailable; the
///   caller must fall back to a unary path. This is not an error.
/// - `NotAccepted(e)` — `(false, non-nil)`: the caller's own context expired
///   or was canceled (or the exporter is shutting down) before any stream
///   accepted the request.
#[derive(Debug)]
pub enum SendOutcome {
    /// The request reached a stream and the peer replied.
    Sent(Result<(), SendError>),
    /// Downgrade has fired; no stream will ever carry this request.
    NotSent,
    /// The caller's context expired or was canceled (or shutdown raced the
    /// request) before any stream accepted it.
    NotAccepted(SendError),
}

/// The concurrent multi-stream send engine.
///
/// Generic over the opaque payload type `P`, the transport `T`, and the
/// producer factory `Pr`. One `Sender` owns the whole fleet: N work
/// states, a prioritizer, and the stream manager supervising them.
pub struct Sender<P, T: BidiTransport, Pr: ProducerFactory<P>> {
    prioritizer: Arc<dyn Prioritizer<P>>,
    background: CancellationToken,
    downgrade_scope: CancellationToken,
    manager: Option<StreamManager>,
    _transport: std::marker::PhantomData<(T, Pr)>,
}

impl<P, T, Pr> Sender<P, T, Pr>
where
    P: Send + 'static,
    T: BidiTransport<Batch = <Pr::Producer as crate::producer::Producer<P>>::Batch> + 'static,
    Pr: ProducerFactory<P> + Send + Sync + 'static,
{
    /// Constructs N work states, the configured prioritizer, and
    /// launches the stream manager. Streams connect asynchronously;
    /// this returns immediately (spec §4.1 "Start").
    #[must_use]
    pub fn start(
        config: Config,
        producer_factory: Pr,
        transport_config: T::Config,
        parent: CancellationToken,
    ) -> Self {
        let background = parent.child_token();
        let downgrade_scope = background.child_token();

        let streams: Vec<_> = (0..config.num_streams.get())
            .map(|_| WorkState::<P>::new())
            .collect();

        let prioritizer: Arc<dyn Prioritizer<P>> = match config.prioritizer {
            PrioritizerKind::FifoReady => {
                FifoPrioritizer::new(streams.clone(), downgrade_scope.clone())
            }
            PrioritizerKind::Load => {
                let parallelism_hint = std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(1);
                LoadPrioritizer::new(streams.clone(), downgrade_scope.clone(), parallelism_hint)
            }
        };

        let manager = StreamManager::start::<P, T, Pr>(
            streams,
            Arc::clone(&prioritizer),
            Arc::new(producer_factory),
            Arc::new(transport_config),
            config.max_stream_lifetime,
            config.disable_downgrade,
            downgrade_scope.clone(),
        );

        Sender {
            prioritizer,
            background,
            downgrade_scope,
            manager: Some(manager),
            _transport: std::marker::PhantomData,
        }
    }

    /// The central operation (spec §4.1 "SendAndWait").
    ///
    /// Retries transparently on [`StreamOutcome::Restart`] until the
    /// item either reaches a final result or the caller context /
    /// shutdown fires. Requires `P: Clone` because a restarted attempt
    /// re-encodes the same payload on a different stream; real
    /// payloads are expected to be cheap to clone (e.g. `Arc`-wrapped
    /// column batches), matching how the teacher's exporter hands the
    /// same `OtapArrowRecords` to a freshly chosen client.
    #[instrument(skip_all)]
    pub async fn send_and_wait(
        &self,
        ctx: CallerContext,
        payload: P,
        metadata: HashMap<String, String>,
        uncompressed_size: usize,
    ) -> SendOutcome
    where
        P: Clone,
    {
        loop {
            if ctx.is_cancelled() {
                return SendOutcome::NotAccepted(SendError::Cancelled);
            }

            let writer = match self.prioritizer.next_writer(&ctx).await {
                Ok(Some(writer)) => writer,
                Ok(None) => return SendOutcome::NotSent,
                Err(e) => return SendOutcome::NotAccepted(e),
            };

            let (completion_tx, completion_rx) = tokio::sync::oneshot::channel();
            let item = WriteItem {
                payload: payload.clone(),
                metadata: metadata.clone(),
                uncompressed_size,
                ctx: ctx.clone(),
                completion: completion_tx,
            };

            match writer.send_and_wait(item, completion_rx).await {
                Ok(StreamOutcome::Restart) => continue,
                Ok(StreamOutcome::Delivered(result)) => return SendOutcome::Sent(result),
                Err(e) => return SendOutcome::NotAccepted(e),
            }
        }
    }

    /// True once downgrade has fired; callers that want to stop
    /// offering the streaming path entirely (rather than discovering
    /// it one `send_and_wait` at a time) can poll this.
    #[must_use]
    pub fn is_downgraded(&self) -> bool {
        self.prioritizer.is_downgraded()
    }

    /// Resolves once downgrade fires, for callers that want to await
    /// the transition rather than poll it.
    pub async fn downgraded(&self) {
        self.downgrade_scope.cancelled().await;
    }

    /// Cancels the background context and waits for every spawned task
    /// to return (spec §4.1 "Shutdown"), including every stream's writer
    /// and reader task and any background tasks the prioritizer owns
    /// (spec §8 testable property #3 "no goroutine spawned by the core
    /// remains running").
    pub async fn shutdown(mut self) {
        self.background.cancel();
        if let Some(manager) = self.manager.take() {
            manager.join().await;
        }
        self.prioritizer.join().await;
    }
}

impl<P, T: BidiTransport, Pr: ProducerFactory<P>> Drop for Sender<P, T, Pr> {
    fn drop(&mut self) {
        // Best-effort: a caller who forgets to call `shutdown` still
        // gets the background context canceled so tasks wind down,
        // though nothing awaits their completion.
        self.background.cancel();
    }
}
