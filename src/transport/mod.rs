// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The underlying bidirectional RPC collaborator (spec §4.1 "Outbound —
//! to the underlying bidirectional RPC", §6).
//!
//! The wire bytes are opaque to this crate (spec §1 Non-goals); this
//! module only defines the seam the concurrency engine drives. See
//! `transport::arrow_grpc` (ambient, production adapter) for the real
//! tonic/otel-arrow-rust implementation of this trait.

use async_trait::async_trait;
use std::fmt;

pub mod arrow_grpc;
pub mod compression;

/// The peer's reply to one transmitted batch (spec §6 "Receive one
/// status message per call; status carries: batch identifier, status
/// code, optional message").
#[derive(Debug, Clone)]
pub struct BatchStatus {
    /// The batch identifier this status responds to.
    pub batch_id: u64,
    /// How the core should classify this status (spec §4.4 reader loop).
    pub outcome: PeerOutcome,
}

/// The classification of a peer status code, per spec §4.4 step 3.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PeerOutcome {
    /// OK — acknowledged.
    Ok,
    /// Distinguished "stream shutdown" status: the caller should
    /// transparently retry on a fresh stream.
    StreamShutdown,
    /// A retryable peer status, with its message.
    Retryable(String),
    /// A permanent peer status, with its message.
    Permanent(String),
    /// An unrecognized numeric status.
    Unknown {
        /// The raw status code.
        code: i32,
        /// The peer-supplied message, if any.
        message: String,
    },
}

impl fmt::Display for PeerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerOutcome::Ok => write!(f, "ok"),
            PeerOutcome::StreamShutdown => write!(f, "stream-shutdown"),
            PeerOutcome::Retryable(msg) => write!(f, "retryable: {msg}"),
            PeerOutcome::Permanent(msg) => write!(f, "permanent: {msg}"),
            PeerOutcome::Unknown { code, message } => {
                write!(f, "unknown({code}): {message}")
            }
        }
    }
}

/// Errors a transport source can report from `recv`, distinguishing the
/// one status the manager cares about: the peer not understanding the
/// streaming protocol at all (spec §4.4 step 2, §4.3 "Protocol
/// unsupported").
pub trait RecvErrorKind: std::error::Error + Send + Sync + 'static {
    /// True if this error is the distinguished "unimplemented" status:
    /// the peer does not speak the streaming protocol.
    fn is_unsupported(&self) -> bool;
}

/// The sending half of one bidirectional RPC instance, owned
/// exclusively by that stream's writer task.
#[async_trait]
pub trait TransportSink: Send {
    /// The wire batch type this transport sends.
    type Batch: Send + 'static;
    /// Send failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transmits one wire batch with its metadata headers attached
    /// (spec §4.4 writer loop step 2 "Attach the metadata headers to
    /// the outgoing batch").
    async fn send(
        &mut self,
        batch: Self::Batch,
        metadata: &std::collections::HashMap<String, String>,
    ) -> Result<(), Self::Error>;

    /// Signals the peer to begin an orderly drain. Does not itself wait
    /// for end-of-stream; the reader continues draining separately.
    async fn close_send(&mut self);
}

/// The receiving half of one bidirectional RPC instance, owned
/// exclusively by that stream's reader.
#[async_trait]
pub trait TransportSource: Send {
    /// Receive failures.
    type Error: RecvErrorKind;

    /// Receives one status message, or `Ok(None)` on clean end-of-stream.
    async fn recv(&mut self) -> Result<Option<BatchStatus>, Self::Error>;
}

/// One bidirectional RPC instance (spec §3 "Stream").
///
/// Split into independent sink/source halves so the writer and reader
/// tasks can each own one exclusively — the only concurrent use this
/// abstraction needs to support (spec §5 "safe only for this split").
#[async_trait]
pub trait BidiTransport: Send + Sized {
    /// The wire batch type this transport sends.
    type Batch: Send + 'static;
    /// Whatever a concrete transport needs to dial a fresh connection
    /// (endpoint, compression, channel handle to reuse). Shared
    /// immutably across every stream instance in the fleet.
    type Config: Send + Sync + 'static;
    /// Connection-establishment failures.
    type ConnectError: std::error::Error + Send + Sync + 'static;
    /// The sending half.
    type Sink: TransportSink<Batch = Self::Batch> + Send;
    /// The receiving half.
    type Source: TransportSource + Send;

    /// Establishes the underlying RPC. Fatal on failure: the stream
    /// transitions directly to Terminated with no handle (spec §4.3
    /// "Connecting").
    async fn connect(config: &Self::Config) -> Result<Self, Self::ConnectError>;

    /// Splits into independent sink and source halves.
    fn split(self) -> (Self::Sink, Self::Source);
}
