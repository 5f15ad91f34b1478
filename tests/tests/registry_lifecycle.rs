//! Registry lifecycle against real stream workers and the real archiver.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use etl_core::{PipelineFactory, Result, StreamKey, StreamPipeline};
use etl_worker::{Shutdown, StreamRegistry};
use integration_tests::fixtures;
use integration_tests::mocks::{RecordingFactory, RecordingState};
use integration_tests::setup::TestContext;

/// Factory whose first `failures` builds fail. The registry must retry
/// the stream on a later scan instead of writing it off.
struct FlakyFactory {
    inner: RecordingFactory,
    failures: AtomicUsize,
}

#[async_trait]
impl PipelineFactory for FlakyFactory {
    async fn build(&self, key: &StreamKey) -> Result<Arc<dyn StreamPipeline>> {
        let remaining = self.failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::Relaxed);
            return Err(etl_core::Error::pipeline(key.prefix(), "factory not ready"));
        }
        self.inner.build(key).await
    }
}

/// stop() right after start(): the final scan must still claim files
/// already sitting in the processing area, and join() must not return
/// until they are processed.
#[tokio::test]
async fn stop_and_join_drain_files_present_at_shutdown() {
    let ctx = TestContext::new(50);
    std::fs::create_dir_all(&ctx.processing_dir).expect("create processing dir");

    let p1 = fixtures::stream_key("temp", 1);
    let p2 = fixtures::stream_key("audio", 2);
    for (key, suffix) in [(&p1, "a.csv"), (&p1, "b.csv"), (&p2, "c.csv")] {
        std::fs::write(
            ctx.processing_dir.join(fixtures::stream_file(key, suffix)),
            b"x",
        )
        .expect("write stream file");
    }

    let state = RecordingState::new();
    let registry = StreamRegistry::start(
        ctx.config.registry.clone(),
        Arc::new(RecordingFactory::new(state.clone())),
        ctx.archiver.clone(),
        Shutdown::new(),
    );
    registry.stop();
    tokio::time::timeout(Duration::from_secs(5), registry.join())
        .await
        .expect("join terminates")
        .expect("join succeeds");

    assert_eq!(state.files_for(&p1).len(), 2);
    assert_eq!(state.files_for(&p2).len(), 1);
    let leftover = std::fs::read_dir(&ctx.processing_dir).unwrap().count();
    assert_eq!(leftover, 0, "every file must be consumed before join returns");
}

#[tokio::test]
async fn one_worker_handles_files_arriving_across_scans() {
    let ctx = TestContext::new(50);
    std::fs::create_dir_all(&ctx.processing_dir).expect("create processing dir");
    let key = fixtures::stream_key("temp", 1);

    let state = RecordingState::new();
    let factory = Arc::new(RecordingFactory::new(state.clone()));
    let registry = StreamRegistry::start(
        ctx.config.registry.clone(),
        factory.clone(),
        ctx.archiver.clone(),
        Shutdown::new(),
    );

    std::fs::write(
        ctx.processing_dir.join(fixtures::stream_file(&key, "first.csv")),
        b"x",
    )
    .expect("write first file");
    tokio::time::sleep(Duration::from_millis(80)).await;

    std::fs::write(
        ctx.processing_dir.join(fixtures::stream_file(&key, "second.csv")),
        b"x",
    )
    .expect("write second file");
    tokio::time::sleep(Duration::from_millis(80)).await;

    registry.stop();
    registry.join().await.expect("join succeeds");

    assert_eq!(factory.built_keys().len(), 1, "same stream must not be rebuilt");
    assert_eq!(state.files_for(&key).len(), 2);
}

#[tokio::test]
async fn failed_pipeline_build_is_retried_on_a_later_scan() {
    let ctx = TestContext::new(50);
    std::fs::create_dir_all(&ctx.processing_dir).expect("create processing dir");
    let key = fixtures::stream_key("temp", 1);
    std::fs::write(
        ctx.processing_dir.join(fixtures::stream_file(&key, "a.csv")),
        b"x",
    )
    .expect("write stream file");

    let state = RecordingState::new();
    let factory = Arc::new(FlakyFactory {
        inner: RecordingFactory::new(state.clone()),
        failures: AtomicUsize::new(1),
    });
    let registry = StreamRegistry::start(
        ctx.config.registry.clone(),
        factory,
        ctx.archiver.clone(),
        Shutdown::new(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    registry.stop();
    assert_eq!(registry.spawned_count(), 1, "stream spawns once the build succeeds");
    registry.join().await.expect("join succeeds");

    assert_eq!(state.files_for(&key).len(), 1);
}
