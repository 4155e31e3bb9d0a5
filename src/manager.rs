// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Supervises the stream fleet's lifetime: starts the initial N streams,
//! restarts the ones that end having established their RPC, and drives
//! the one-way downgrade transition when every stream fails to
//! negotiate the streaming protocol (spec §4.3).

use crate::jitter::add_jitter;
use crate::prioritizer::{Prioritizer, StreamId};
use crate::producer::ProducerFactory;
use crate::stream::{self, StreamReturn};
use crate::transport::BidiTransport;
use crate::work_state::WorkState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns the supervisor task, which in turn owns a [`JoinSet`] of every
/// live stream task plus the "returning" channel they report on. Awaited
/// at [`crate::sender::Sender::shutdown`]; the supervisor does not return
/// until every stream task it ever spawned — including ones spawned as
/// restarts after shutdown was requested — has itself returned.
pub(crate) struct StreamManager {
    returning_task: JoinHandle<()>,
}

impl StreamManager {
    /// Spawns the initial fleet and the supervisor loop that restarts
    /// or retires each slot as streams terminate.
    pub(crate) fn start<P, T, Pr>(
        streams: Vec<Arc<WorkState<P>>>,
        prioritizer: Arc<dyn Prioritizer<P>>,
        producer_factory: Arc<Pr>,
        transport_config: Arc<T::Config>,
        max_stream_lifetime: Duration,
        disable_downgrade: bool,
        downgrade_scope: CancellationToken,
    ) -> Self
    where
        P: Send + 'static,
        T: BidiTransport<Batch = <Pr::Producer as crate::producer::Producer<P>>::Batch>
            + 'static,
        Pr: ProducerFactory<P> + Send + Sync + 'static,
    {
        let running = streams.len();
        let (returning_tx, returning_rx) = mpsc::channel::<StreamReturn<P>>(streams.len().max(1));
        let mut stream_tasks = JoinSet::new();

        for (id, work_state) in streams.into_iter().enumerate() {
            spawn_stream::<P, T, Pr>(
                &mut stream_tasks,
                id,
                work_state,
                Arc::clone(&prioritizer),
                Arc::clone(&producer_factory),
                Arc::clone(&transport_config),
                max_stream_lifetime,
                downgrade_scope.clone(),
                returning_tx.clone(),
            );
        }

        let returning_task = tokio::spawn(supervise::<P, T, Pr>(
            stream_tasks,
            returning_rx,
            returning_tx,
            prioritizer,
            producer_factory,
            transport_config,
            max_stream_lifetime,
            disable_downgrade,
            downgrade_scope,
            running,
        ));

        StreamManager { returning_task }
    }

    /// Waits for the supervisor loop to exit — it does so once the
    /// downgrade-scoped context is canceled (shutdown) or downgrade fires
    /// and every stream has reported back — and, crucially, for every
    /// stream task the supervisor ever spawned to have itself returned
    /// (spec §4.1 "Shutdown... wait for all spawned goroutines to return").
    pub(crate) async fn join(self) {
        let _ = self.returning_task.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise<P, T, Pr>(
    mut stream_tasks: JoinSet<()>,
    mut returning_rx: mpsc::Receiver<StreamReturn<P>>,
    returning_tx: mpsc::Sender<StreamReturn<P>>,
    prioritizer: Arc<dyn Prioritizer<P>>,
    producer_factory: Arc<Pr>,
    transport_config: Arc<T::Config>,
    max_stream_lifetime: Duration,
    disable_downgrade: bool,
    downgrade_scope: CancellationToken,
    mut running: usize,
) where
    P: Send + 'static,
    T: BidiTransport<Batch = <Pr::Producer as crate::producer::Producer<P>>::Batch> + 'static,
    Pr: ProducerFactory<P> + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            () = downgrade_scope.cancelled() => break,
            returned = returning_rx.recv() => {
                let Some(returned) = returned else { break };
                let StreamReturn { id, work_state, established } = returned;

                if established || disable_downgrade {
                    debug!(stream = id, "restarting stream");
                    spawn_stream::<P, T, Pr>(
                        &mut stream_tasks,
                        id,
                        work_state,
                        Arc::clone(&prioritizer),
                        Arc::clone(&producer_factory),
                        Arc::clone(&transport_config),
                        max_stream_lifetime,
                        downgrade_scope.clone(),
                        returning_tx.clone(),
                    );
                    continue;
                }

                running -= 1;
                if running == 0 {
                    info!("arrow is not supported by any peer, downgrading to standard OTLP export");
                    prioritizer.downgrade();
                    downgrade_scope.cancel();
                    break;
                }
            }
        }
    }

    // Every stream task sends its `StreamReturn` before its own future
    // completes (see `spawn_stream`), so draining the set here also
    // guarantees every writer/reader pair has fully wound down — not just
    // that the supervisor stopped restarting them (spec testable property
    // #3 "no goroutine spawned by the core remains running" after Shutdown).
    while stream_tasks.join_next().await.is_some() {}
}

#[allow(clippy::too_many_arguments)]
fn spawn_stream<P, T, Pr>(
    stream_tasks: &mut JoinSet<()>,
    id: StreamId,
    work_state: Arc<WorkState<P>>,
    prioritizer: Arc<dyn Prioritizer<P>>,
    producer_factory: Arc<Pr>,
    transport_config: Arc<T::Config>,
    max_stream_lifetime: Duration,
    downgrade_scope: CancellationToken,
    returning_tx: mpsc::Sender<StreamReturn<P>>,
) where
    P: Send + 'static,
    T: BidiTransport<Batch = <Pr::Producer as crate::producer::Producer<P>>::Batch> + 'static,
    Pr: ProducerFactory<P> + Send + Sync + 'static,
{
    let lifetime = add_jitter(max_stream_lifetime);
    stream_tasks.spawn(async move {
        let producer = producer_factory.new_producer();
        let outcome = stream::run::<P, T, Pr::Producer>(
            id,
            work_state,
            prioritizer,
            producer,
            transport_config,
            lifetime,
            downgrade_scope,
        )
        .await;
        // The manager is always alive for at least as long as any
        // stream it spawned; a send failure here would mean shutdown
        // raced the last stream's teardown, which is harmless to lose.
        let _ = returning_tx.send(outcome).await;
    });
}
