// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration recognized by the sender core (spec §6).
//!
//! Parsing and validating the *outer* configuration tree is explicitly
//! out of scope; this module only defines the options the core itself
//! consumes, in the teacher's `serde::Deserialize` + `#[serde(default =
//! "...")]` style (see `otlp_exporter::Config` in the teacher crate).

use async_trait::async_trait;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Which prioritizer variant (spec §4.2) a [`Config`] selects.
#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrioritizerKind {
    /// FIFO-ready: a channel of "stream is ready" tokens.
    FifoReady,
    /// Power-of-two-choices load balancing across stream input queues.
    Load,
}

/// Configuration options recognized by the sender core.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of long-lived streams in the fleet.
    pub num_streams: NonZeroUsize,

    /// Duration after which a stream initiates an orderly close-send.
    /// Zero means "no jitter, no expiry".
    #[serde(with = "humantime_serde", default = "default_max_stream_lifetime")]
    pub max_stream_lifetime: Duration,

    /// If true, an "unsupported" status never triggers downgrade;
    /// streams are retried indefinitely instead.
    #[serde(default)]
    pub disable_downgrade: bool,

    /// Which prioritizer variant to construct.
    #[serde(default = "default_prioritizer")]
    pub prioritizer: PrioritizerKind,
}

const fn default_max_stream_lifetime() -> Duration {
    Duration::from_secs(60 * 60)
}

const fn default_prioritizer() -> PrioritizerKind {
    PrioritizerKind::FifoReady
}

impl Config {
    /// A single-stream configuration with no expiry; convenient default
    /// for tests and for the N=1 boundary case (spec §8).
    #[must_use]
    pub fn single_stream() -> Self {
        Config {
            num_streams: NonZeroUsize::new(1).expect("1 is non-zero"),
            max_stream_lifetime: Duration::ZERO,
            disable_downgrade: false,
            prioritizer: PrioritizerKind::FifoReady,
        }
    }
}

/// Supplies per-request metadata headers (e.g. credential tokens) given
/// the caller's own cancellation signal. Left as a collaborator trait:
/// acquiring the credentials themselves is out of scope here.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the metadata headers to attach to the next request.
    async fn headers(&self) -> HashMap<String, String>;
}

/// A [`CredentialProvider`] that attaches no metadata. Used when no
/// provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCredentialProvider;

#[async_trait]
impl CredentialProvider for NoopCredentialProvider {
    async fn headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}
