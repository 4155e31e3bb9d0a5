// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory fake transport and producer used across the integration
//! tests, standing in for the real `otel-arrow-rust`/tonic collaborator.

use async_trait::async_trait;
use otap_stream_exporter::producer::{Producer, ProducerFactory};
use otap_stream_exporter::transport::{
    BatchStatus, BidiTransport, PeerOutcome, RecvErrorKind, TransportSink, TransportSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// A payload, opaque to the crate, just a string for test assertions.
pub type Payload = String;

/// Trivial 1:1 producer: the "batch" is just the payload itself.
#[derive(Default)]
pub struct EchoProducer;

impl Producer<Payload> for EchoProducer {
    type Batch = Payload;
    type Error = std::convert::Infallible;

    fn produce(&mut self, payload: Payload) -> Result<Self::Batch, Self::Error> {
        Ok(payload)
    }
}

pub struct EchoProducerFactory;

impl ProducerFactory<Payload> for EchoProducerFactory {
    type Producer = EchoProducer;

    fn new_producer(&self) -> Self::Producer {
        EchoProducer
    }
}

/// Shared knobs controlling how [`FakeTransport::connect`] behaves,
/// set up by each test before starting a `Sender`.
#[derive(Clone)]
pub struct FakeTransportConfig {
    /// If true, `connect` fails every time (spec §8 scenario 3).
    pub fail_connect: bool,
    /// If true, the first response on every stream is "unsupported"
    /// (spec §8 scenario 4/5).
    pub unsupported: Arc<AtomicBool>,
    /// Number of times `connect` has been called, for tests that
    /// assert on restart counts.
    pub connect_attempts: Arc<AtomicU64>,
    /// If set, the reader never produces a response (simulates an
    /// unresponsive peer, spec §8 scenario 2/6).
    pub unresponsive: bool,
    /// Every `(payload, metadata)` pair the fake peer actually received,
    /// in arrival order, for tests that assert on per-request metadata
    /// (spec §8 scenario 8).
    pub received: Arc<parking_lot::Mutex<Vec<(Payload, HashMap<String, String>)>>>,
}

impl Default for FakeTransportConfig {
    fn default() -> Self {
        FakeTransportConfig {
            fail_connect: false,
            unsupported: Arc::new(AtomicBool::new(false)),
            connect_attempts: Arc::new(AtomicU64::new(0)),
            unresponsive: false,
            received: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }
}

pub struct FakeTransport {
    unsupported_first: bool,
    unresponsive: bool,
    received: Arc<parking_lot::Mutex<Vec<(Payload, HashMap<String, String>)>>>,
    to_peer: mpsc::Receiver<(Payload, HashMap<String, String>)>,
    to_sink: mpsc::Sender<(Payload, HashMap<String, String>)>,
}

#[async_trait]
impl BidiTransport for FakeTransport {
    type Batch = Payload;
    type Config = FakeTransportConfig;
    type ConnectError = std::io::Error;
    type Sink = FakeSink;
    type Source = FakeSource;

    async fn connect(config: &FakeTransportConfig) -> Result<Self, Self::ConnectError> {
        config.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if config.fail_connect {
            return Err(std::io::Error::other("connect refused"));
        }
        let (to_sink, to_peer) = mpsc::channel(8);
        Ok(FakeTransport {
            unsupported_first: config.unsupported.load(Ordering::SeqCst),
            unresponsive: config.unresponsive,
            received: Arc::clone(&config.received),
            to_peer,
            to_sink,
        })
    }

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            FakeSink {
                to_sink: self.to_sink,
            },
            FakeSource {
                to_peer: self.to_peer,
                unsupported_first: self.unsupported_first,
                unresponsive: self.unresponsive,
                received: self.received,
                first: true,
                next_batch_id: 0,
            },
        )
    }
}

pub struct FakeSink {
    to_sink: mpsc::Sender<(Payload, HashMap<String, String>)>,
}

#[async_trait]
impl TransportSink for FakeSink {
    type Batch = Payload;
    type Error = std::io::Error;

    async fn send(
        &mut self,
        batch: Payload,
        metadata: &HashMap<String, String>,
    ) -> Result<(), Self::Error> {
        self.to_sink
            .send((batch, metadata.clone()))
            .await
            .map_err(|_| std::io::Error::other("peer gone"))
    }

    async fn close_send(&mut self) {
        let (replacement, _) = mpsc::channel(1);
        self.to_sink = replacement;
    }
}

pub struct FakeSource {
    to_peer: mpsc::Receiver<(Payload, HashMap<String, String>)>,
    unsupported_first: bool,
    unresponsive: bool,
    received: Arc<parking_lot::Mutex<Vec<(Payload, HashMap<String, String>)>>>,
    first: bool,
    next_batch_id: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("fake transport receive error: {0}")]
pub struct FakeRecvError(String);

impl RecvErrorKind for FakeRecvError {
    fn is_unsupported(&self) -> bool {
        self.0 == "unsupported"
    }
}

#[async_trait]
impl TransportSource for FakeSource {
    type Error = FakeRecvError;

    async fn recv(&mut self) -> Result<Option<BatchStatus>, Self::Error> {
        if self.first && self.unsupported_first {
            self.first = false;
            return Err(FakeRecvError("unsupported".to_string()));
        }
        self.first = false;

        if self.unresponsive {
            std::future::pending::<()>().await;
            unreachable!();
        }

        match self.to_peer.recv().await {
            Some((payload, metadata)) => {
                self.received.lock().push((payload, metadata));
                let batch_id = self.next_batch_id;
                self.next_batch_id += 1;
                Ok(Some(BatchStatus {
                    batch_id,
                    outcome: PeerOutcome::Ok,
                }))
            }
            None => Ok(None),
        }
    }
}
