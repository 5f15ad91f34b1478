//! End-to-end runs of the whole ETL: ingest, stream fan-out, drain,
//! aggregation.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use cloud_store::Journal;
use etl_worker::{AggregationWindow, EtlOrchestrator, EtlState, Shutdown};
use integration_tests::fixtures;
use integration_tests::mocks::{CountingRollup, RecordingFactory, RecordingState};
use integration_tests::setup::TestContext;

/// Spec scenario: A1 and A2 carry prefix P1, A3 carries P2, cap 50.
/// Exactly two stream workers; P1's sees files from both archives; one
/// aggregation pass after the drain.
#[tokio::test]
async fn two_streams_three_archives_one_aggregation() {
    let ctx = TestContext::new(50);
    let p1 = fixtures::stream_key("temp", 1);
    let p2 = fixtures::stream_key("audio", 2);

    fixtures::archive_of(&ctx.upload_dir.join("a1.zip"), &[(&p1, "r1.csv")]);
    fixtures::archive_of(&ctx.upload_dir.join("a2.zip"), &[(&p1, "r2.csv")]);
    fixtures::archive_of(&ctx.upload_dir.join("a3.zip"), &[(&p2, "r3.csv")]);

    let state = RecordingState::new();
    let factory = Arc::new(RecordingFactory::new(state.clone()));
    let rollup = Arc::new(CountingRollup::default());

    let orchestrator = EtlOrchestrator::new(
        ctx.store.clone(),
        factory.clone(),
        ctx.archiver.clone(),
        Some(rollup.clone()),
        ctx.config.clone(),
        Shutdown::new(),
    );
    let summary = orchestrator.run().await.expect("run succeeds");

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.archives_ingested, 3);
    assert_eq!(summary.streams_seen, 2, "exactly one worker per prefix");
    assert!(summary.aggregated);
    assert_eq!(orchestrator.state(), EtlState::Done);

    let p1_files = state.files_for(&p1);
    assert_eq!(p1_files.len(), 2, "P1 worker must see files from A1 and A2");
    assert!(p1_files.contains(&fixtures::stream_file(&p1, "r1.csv")));
    assert!(p1_files.contains(&fixtures::stream_file(&p1, "r2.csv")));

    let p2_files = state.files_for(&p2);
    assert_eq!(p2_files, vec![fixtures::stream_file(&p2, "r3.csv")]);

    assert_eq!(
        rollup.calls(),
        vec![AggregationWindow::Daily],
        "aggregation runs exactly once, after the drain"
    );

    // Processing area is fully drained.
    let leftover = std::fs::read_dir(&ctx.processing_dir)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn batches_are_sequential_and_sized_by_the_cap() {
    let ctx = TestContext::new(2);
    let key = fixtures::stream_key("temp", 1);
    // 5 archives with cap 2 -> ceil(5/2) = 3 batches.
    for i in 0..5 {
        fixtures::archive_of(
            &ctx.upload_dir.join(format!("a{i}.zip")),
            &[(&key, &format!("r{i}.csv"))],
        );
    }

    let state = RecordingState::new();
    let factory = Arc::new(RecordingFactory::new(state.clone()));
    let orchestrator = EtlOrchestrator::new(
        ctx.store.clone(),
        factory.clone(),
        ctx.archiver.clone(),
        None,
        ctx.config.clone(),
        Shutdown::new(),
    );
    let summary = orchestrator.run().await.expect("run succeeds");

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.archives_ingested, 5);
    assert_eq!(state.total_files(), 5);
    // One worker per batch for the single prefix: spawned counts add up
    // across batches.
    assert_eq!(summary.streams_seen, 3);
}

/// Re-running the job over an already-processed archive must not write
/// duplicate journal records: the journal deduplicates on source name.
#[tokio::test]
async fn redelivered_archive_produces_no_duplicate_records() {
    let ctx = TestContext::new(50);
    let key = fixtures::stream_key("temp", 1);
    fixtures::archive_of(&ctx.upload_dir.join("a1.zip"), &[(&key, "r1.csv")]);

    let journal = Journal::new(&ctx.journal_dir);
    let day = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();

    for run in 0..2 {
        let state = RecordingState::new();
        let factory = Arc::new(RecordingFactory::new(state));
        let orchestrator = EtlOrchestrator::new(
            ctx.store.clone(),
            factory,
            ctx.archiver.clone(),
            None,
            ctx.config.clone(),
            Shutdown::new(),
        );
        orchestrator.run().await.expect("run succeeds");

        assert_eq!(
            journal.record_count(&key, day).await.unwrap(),
            1,
            "run {run}: exactly one journalled record for r1.csv"
        );
    }
}

#[tokio::test]
async fn cancelled_run_terminates_without_aggregating() {
    let ctx = TestContext::new(50);
    let shutdown = Shutdown::new();
    shutdown.cancel();

    let orchestrator = EtlOrchestrator::new(
        ctx.store.clone(),
        Arc::new(RecordingFactory::new(RecordingState::new())),
        ctx.archiver.clone(),
        None,
        ctx.config.clone(),
        shutdown,
    );
    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("cancelled run terminates")
        .expect("cancellation is not an error");
    assert!(!summary.aggregated);
}
