// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The concurrent multi-stream send/receive engine of an OTAP
//! (OpenTelemetry Protocol with Apache Arrow) streaming exporter.
//!
//! A [`sender::Sender`] accepts a caller's payload, routes it through a
//! pluggable [`prioritizer::Prioritizer`] to one of a fixed fleet of
//! long-lived bidirectional streams, and transparently retries on
//! [`item::StreamOutcome::Restart`] when the stream it picked breaks
//! mid-flight. A [`manager::StreamManager`] supervises that fleet:
//! restarting streams that had established their RPC, and triggering a
//! one-way downgrade once every stream has failed to negotiate the
//! streaming protocol with the peer.
//!
//! Columnar encoding, credential acquisition, and the wire format
//! itself are modeled as collaborator traits ([`producer::Producer`],
//! [`transport::BidiTransport`]) rather than owned here; see
//! `transport::arrow_grpc` for the production adapter over
//! `otel-arrow-rust` and `tonic`.

pub mod config;
pub mod error;
pub mod item;
pub mod jitter;
pub(crate) mod manager;
pub mod prioritizer;
pub mod producer;
pub mod sender;
pub(crate) mod stream;
pub mod transport;
pub(crate) mod work_state;

pub use error::SendError;
pub use item::{CallerContext, WriteItem};
pub use sender::{Sender, SendOutcome};
