// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The encoder ("producer") collaborator (spec §4.1 "Outbound — to the
//! encoder").
//!
//! The encoder is stateful (dictionary/column carryover across
//! batches), so it is owned exclusively by one stream's writer task and
//! never shared — strict per-stream ordering is what makes that state
//! valid across calls.

/// Converts one caller payload into one wire batch, preserving whatever
/// cross-batch state the concrete encoder needs (e.g. an Arrow IPC
/// dictionary). A fresh producer is constructed per stream and released
/// when the stream ends.
pub trait Producer<P>: Send {
    /// The encoded wire batch type, opaque to this crate.
    type Batch: Send + 'static;
    /// Encoding failures, fatal to the owning stream only.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Encodes `payload` into a wire batch.
    fn produce(&mut self, payload: P) -> Result<Self::Batch, Self::Error>;
}

/// Constructs a fresh [`Producer`] for a new stream instance.
pub trait ProducerFactory<P>: Send + Sync {
    /// The producer type this factory constructs.
    type Producer: Producer<P>;

    /// Builds a new, empty-state producer.
    fn new_producer(&self) -> Self::Producer;
}
