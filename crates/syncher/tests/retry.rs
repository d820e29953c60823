//! Instances over a retrying transport with injected failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use syncher::channel::{BackoffConfig, ChannelError, RetryTransport};
use syncher::store::{MemoryStore, Store};
use syncher::{Sequencer, SyncherError};
use syncher_testkit::{instance, sample_data, FlakyTransport, Harness};

type Flaky = FlakyTransport<Arc<Sequencer<MemoryStore>>>;

fn fast_backoff(max_attempts: u32) -> BackoffConfig {
    BackoffConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    }
}

fn retrying(harness: &Harness, max_attempts: u32) -> Arc<RetryTransport<Flaky>> {
    let flaky = FlakyTransport::new(Arc::clone(&harness.server));
    Arc::new(RetryTransport::new(flaky, fast_backoff(max_attempts)))
}

#[tokio::test]
async fn transient_failures_are_retried() -> Result<()> {
    let harness = Harness::new();
    let transport = retrying(&harness, 5);
    let doc = instance(Arc::clone(&transport), sample_data());

    transport.inner().fail_next(2);
    doc.create().await?;
    assert_eq!(transport.inner().attempts(), 3);

    transport.inner().fail_next(3);
    doc.update_key("foo", json!("after-retries")).await?;
    assert_eq!(transport.inner().attempts(), 7);

    let stored = harness.server.store().get(doc.id()).await?.unwrap();
    assert_eq!(stored.data["foo"], "after-retries");
    assert_eq!(stored.version, 1);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_surface_transport_failure() -> Result<()> {
    let harness = Harness::new();
    let transport = retrying(&harness, 3);
    let doc = instance(Arc::clone(&transport), sample_data());

    transport.inner().fail_next(10);
    let err = doc.create().await.unwrap_err();
    assert!(matches!(
        err,
        SyncherError::TransportFailure(ChannelError::Unavailable(_))
    ));
    assert_eq!(transport.inner().attempts(), 3);
    assert!(!doc.is_filled());
    assert!(harness.server.store().get(doc.id()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rejections_are_not_retried() -> Result<()> {
    let harness = Harness::new();
    let transport = retrying(&harness, 5);
    let doc = instance(Arc::clone(&transport), json!({ "id": "nowhere" }));

    let err = doc.load().await.unwrap_err();
    assert!(matches!(err, SyncherError::NotFound(_)));
    assert_eq!(transport.inner().attempts(), 1);
    Ok(())
}
