// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

mod support;

use otap_stream_exporter::config::Config;
use otap_stream_exporter::error::SendError;
use otap_stream_exporter::{CallerContext, SendOutcome};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use support::{EchoProducerFactory, FakeTransport, FakeTransportConfig};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn caller_timeout_returns_cancelled_promptly() {
    let transport_config = FakeTransportConfig {
        unresponsive: true,
        ..Default::default()
    };

    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        Config::single_stream(),
        EchoProducerFactory,
        transport_config,
        CancellationToken::new(),
    );

    let deadline = Instant::now() + Duration::from_millis(200);
    let ctx = CallerContext::new(CancellationToken::new()).with_deadline(deadline);

    let started = Instant::now();
    let outcome = sender
        .send_and_wait(ctx, "hello".to_string(), HashMap::new(), 0)
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(outcome, SendOutcome::NotAccepted(SendError::Cancelled)));
    assert!(
        elapsed < Duration::from_millis(260),
        "expected prompt cancellation, took {elapsed:?}"
    );

    sender.shutdown().await;
}

#[tokio::test]
async fn already_cancelled_context_short_circuits() {
    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        Config::single_stream(),
        EchoProducerFactory,
        FakeTransportConfig::default(),
        CancellationToken::new(),
    );

    let ctx = CallerContext::already_cancelled();
    let outcome = sender
        .send_and_wait(ctx, "hello".to_string(), HashMap::new(), 0)
        .await;
    assert!(matches!(outcome, SendOutcome::NotAccepted(SendError::Cancelled)));

    sender.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_to_call_once() {
    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        Config::single_stream(),
        EchoProducerFactory,
        FakeTransportConfig::default(),
        CancellationToken::new(),
    );
    // Shutdown consumes `self`; idempotence here means a second
    // construct-then-shutdown cycle behaves the same way, since the
    // API makes a double-shutdown on one instance unrepresentable.
    sender.shutdown().await;

    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        Config::single_stream(),
        EchoProducerFactory,
        FakeTransportConfig::default(),
        CancellationToken::new(),
    );
    sender.shutdown().await;
}
