use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, interval_config, wait_until},
    memory_store::{MemoryPipeline, NodeAddress},
};
use anyhow::{Context, Result};
use pplns_stream::{
    ConfigurationError, InputStream, PreparedInput, Processor, ProcessorOutput, Runner, Worker,
};
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_stops_when_shutdown_token_is_cancelled() -> Result<()> {
    init_tracing();
    let store = MemoryPipeline::new();
    store.register_worker(Worker::new("echo-worker").with_input("in"));
    let node = NodeAddress::new("node-1", "task-1").with_worker("echo-worker");
    store.seed_item(&node, "in", vec![json!("x")]);

    let shutdown = CancellationToken::new();
    let stream = InputStream::with_cancellation_token(
        store.api(),
        node.query(),
        interval_config(Duration::from_millis(20), 1),
        shutdown.clone(),
    );
    let processed = Arc::new(AtomicUsize::new(0));
    {
        let processed = processed.clone();
        stream.on_data(Processor::single(move |_input: PreparedInput| {
            let processed = processed.clone();
            async move {
                processed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(None::<ProcessorOutput>)
            }
        }))?;
    }
    let closes = Arc::new(AtomicUsize::new(0));
    {
        let closes = closes.clone();
        stream.on_close(move || {
            closes.fetch_add(1, Ordering::SeqCst);
        });
    }

    let runner = Runner::new(stream.clone());
    let watcher = {
        let processed = processed.clone();
        tokio::spawn(async move {
            let outcome = wait_until("bundle processed", Duration::from_secs(5), || {
                processed.load(Ordering::SeqCst) == 1
            })
            .await;
            shutdown.cancel();
            outcome
        })
    };

    timeout(Duration::from_secs(10), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after the token is cancelled")??;
    watcher.await??;

    assert!(runner.cancellation_token().is_cancelled());
    assert!(stream.is_closed());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(stream.telemetry().processed_bundles, 1);
    Ok(())
}

#[tokio::test]
async fn runner_requires_a_data_handler() -> Result<()> {
    let store = MemoryPipeline::new();
    let node = NodeAddress::new("node-1", "task-1");
    let stream = InputStream::new(
        store.api(),
        node.query(),
        interval_config(Duration::from_millis(20), 1),
    );

    let runner = Runner::new(stream);
    let err = runner
        .run_until_ctrl_c()
        .await
        .expect_err("runner without a data handler should not start");
    assert_eq!(
        err.downcast_ref::<ConfigurationError>(),
        Some(&ConfigurationError::MissingDataHandler)
    );
    assert!(!runner.stream().is_closed());
    assert_eq!(store.fetch_count(), 0);
    Ok(())
}
