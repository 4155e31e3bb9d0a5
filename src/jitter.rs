// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Subtractive jitter applied to stream maximum lifetimes.
//!
//! Avoids a thundering herd of streams all reaching their lifetime
//! deadline at once when a fleet of N streams is started together.
//! Jitter is subtractive only: the receiver's configured lifetime is a
//! hard cap, never something we'd push past.

use std::time::Duration;

/// Returns `d` reduced by a uniform random amount in `[0%, 5%)`.
///
/// `add_jitter(Duration::ZERO)` is always `Duration::ZERO`.
#[must_use]
pub fn add_jitter(d: Duration) -> Duration {
    if d.is_zero() {
        return d;
    }
    let factor = rand::random::<f64>() * 0.05;
    let reduction = d.mul_f64(factor);
    d.saturating_sub(reduction)
}
