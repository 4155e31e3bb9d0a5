// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

mod support;

use otap_stream_exporter::config::Config;
use otap_stream_exporter::{CallerContext, SendOutcome};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use support::{EchoProducerFactory, FakeTransport, FakeTransportConfig};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn connect_failure_downgrades() {
    let mut config = Config::single_stream();
    config.num_streams = NonZeroUsize::new(2).unwrap();

    let transport_config = FakeTransportConfig {
        fail_connect: true,
        ..Default::default()
    };

    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        config,
        EchoProducerFactory,
        transport_config,
        CancellationToken::new(),
    );

    sender.downgraded().await;

    let ctx = CallerContext::new(CancellationToken::new());
    let outcome = sender
        .send_and_wait(ctx, "hello".to_string(), HashMap::new(), 0)
        .await;
    assert!(matches!(outcome, SendOutcome::NotSent));

    sender.shutdown().await;
}

#[tokio::test]
async fn protocol_unsupported_downgrades() {
    let mut config = Config::single_stream();
    config.num_streams = NonZeroUsize::new(3).unwrap();

    let transport_config = FakeTransportConfig {
        unsupported: Arc::new(AtomicBool::new(true)),
        ..Default::default()
    };

    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        config,
        EchoProducerFactory,
        transport_config,
        CancellationToken::new(),
    );

    tokio::time::timeout(Duration::from_secs(2), sender.downgraded())
        .await
        .expect("downgrade should fire once every stream reports unsupported");

    let ctx = CallerContext::new(CancellationToken::new());
    let outcome = sender
        .send_and_wait(ctx, "hello".to_string(), HashMap::new(), 0)
        .await;
    assert!(matches!(outcome, SendOutcome::NotSent));

    sender.shutdown().await;
}

#[tokio::test]
async fn disable_downgrade_keeps_retrying() {
    let mut config = Config::single_stream();
    config.disable_downgrade = true;

    let unsupported = Arc::new(AtomicBool::new(true));
    let connect_attempts = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let transport_config = FakeTransportConfig {
        unsupported: Arc::clone(&unsupported),
        connect_attempts: Arc::clone(&connect_attempts),
        ..Default::default()
    };

    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        config,
        EchoProducerFactory,
        transport_config,
        CancellationToken::new(),
    );

    // Give the always-unsupported stream a few restart cycles, then
    // flip to healthy and confirm the sender is not stuck downgraded.
    tokio::time::sleep(Duration::from_millis(50)).await;
    unsupported.store(false, Ordering::SeqCst);

    let ctx = CallerContext::new(CancellationToken::new());
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        sender.send_and_wait(ctx, "hello".to_string(), HashMap::new(), 0),
    )
    .await
    .expect("sender should eventually succeed once the stream recovers");

    assert!(matches!(outcome, SendOutcome::Sent(Ok(()))));
    assert!(!sender.is_downgraded());

    sender.shutdown().await;
}
