// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

mod support;

use otap_stream_exporter::config::Config;
use otap_stream_exporter::{CallerContext, SendOutcome};
use support::{EchoProducerFactory, FakeTransport, FakeTransportConfig};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn single_stream_happy_path() {
    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        Config::single_stream(),
        EchoProducerFactory,
        FakeTransportConfig::default(),
        CancellationToken::new(),
    );

    let ctx = CallerContext::new(CancellationToken::new());
    let outcome = sender
        .send_and_wait(ctx, "hello".to_string(), HashMap::new(), 5)
        .await;

    match outcome {
        SendOutcome::Sent(Ok(())) => {}
        other => panic!("expected Sent(Ok(())), got {other:?}"),
    }

    sender.shutdown().await;
}

#[tokio::test]
async fn per_request_metadata_is_attached() {
    let transport_config = FakeTransportConfig::default();
    let received = std::sync::Arc::clone(&transport_config.received);

    let sender = otap_stream_exporter::Sender::<String, FakeTransport, _>::start(
        Config::single_stream(),
        EchoProducerFactory,
        transport_config,
        CancellationToken::new(),
    );

    for i in 0..10 {
        let mut metadata = HashMap::new();
        if i % 2 == 0 {
            metadata.insert("expected1".to_string(), "metadata1".to_string());
        } else {
            metadata.insert("expected2".to_string(), i.to_string());
        }
        let ctx = CallerContext::new(CancellationToken::new());
        let outcome = sender
            .send_and_wait(ctx, format!("item-{i}"), metadata, 1)
            .await;
        assert!(matches!(outcome, SendOutcome::Sent(Ok(()))));
    }

    sender.shutdown().await;

    // Scenario 8: the recorded sequence of metadata the peer actually saw
    // must exactly equal the sender's alternation pattern, not just that
    // ten sends succeeded.
    let recorded = received.lock();
    assert_eq!(recorded.len(), 10);
    for (i, (payload, metadata)) in recorded.iter().enumerate() {
        assert_eq!(*payload, format!("item-{i}"));
        if i % 2 == 0 {
            assert_eq!(
                metadata.get("expected1").map(String::as_str),
                Some("metadata1")
            );
            assert!(!metadata.contains_key("expected2"));
        } else {
            assert_eq!(
                metadata.get("expected2").map(String::as_str),
                Some(i.to_string().as_str())
            );
            assert!(!metadata.contains_key("expected1"));
        }
    }
}
