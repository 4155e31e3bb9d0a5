// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced across the public boundary of the sender façade.
//!
//! Internal-only signals (stream-restarting, downgrade) are never
//! represented here — see [`crate::stream::StreamOutcome`] — they are
//! consumed within the crate and never cross `send_and_wait`'s return.

use std::fmt;

/// High-level classification of a peer-reported batch status, used to
/// decide whether [`SendError`] is worth a caller-level retry.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PeerErrorKind {
    /// The peer rejected the batch but a retry of the same payload may
    /// succeed later (e.g. unavailable, resource exhausted with a
    /// retry hint).
    Retryable,
    /// The peer rejected the batch and retrying the same payload is
    /// pointless (e.g. invalid argument).
    Permanent,
}

impl fmt::Display for PeerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PeerErrorKind::Retryable => "retryable",
            PeerErrorKind::Permanent => "permanent",
        };
        write!(f, "{label}")
    }
}

/// Errors that can be returned to a caller of [`crate::sender::Sender::send_and_wait`].
///
/// Matches the semantic error kinds of spec §7: caller-cancel and
/// shutdown collapse into [`SendError::Cancelled`]; stream-restarting
/// and protocol-unsupported never leave the crate.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    /// The caller's own context expired or was canceled, or the
    /// exporter is shutting down, before any stream accepted the item.
    #[error("request canceled before a stream accepted it")]
    Cancelled,

    /// The peer reported a status applicable to this payload.
    #[error("peer rejected batch ({kind}): {message}")]
    Peer {
        /// Whether the caller may retry this payload.
        kind: PeerErrorKind,
        /// The peer-supplied status message, if any.
        message: String,
    },

    /// An unrecognized numeric peer status code was observed.
    #[error("peer returned unrecognized status code {code}: {message}")]
    UnknownStatus {
        /// The raw status code.
        code: i32,
        /// The peer-supplied status message, if any.
        message: String,
    },
}

impl SendError {
    /// True if this error carries a peer status that the outer retry
    /// policy may choose to retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SendError::Peer {
                kind: PeerErrorKind::Retryable,
                ..
            }
        )
    }
}

/// Errors that can occur while establishing or running a single stream's
/// underlying transport. Fatal to that stream only; the manager decides
/// whether to restart.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The transport could not be established.
    #[error("failed to connect underlying stream: {0}")]
    Connect(String),
    /// A send or receive on an established transport failed.
    #[error("transport error: {0}")]
    Io(String),
}
