use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use prism_config::{Backpressure, BuildConfig};
use prism_core::{
    BuildCache, BuildPipeline, BuildPriority, BuildResult, ComponentInfo, Compiler, PipelineError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn config(workers: usize, queue_capacity: usize, backpressure: Backpressure) -> BuildConfig {
    BuildConfig {
        workers,
        queue_capacity,
        backpressure,
    }
}

fn echo(component: &ComponentInfo) -> Result<Vec<u8>, String> {
    Ok(format!("compiled:{}", component.name).into_bytes())
}

fn pipeline(config: BuildConfig, compiler: impl Compiler + 'static) -> BuildPipeline {
    BuildPipeline::new(config, Arc::new(BuildCache::default()), Arc::new(compiler))
}

fn collect_results(pipeline: &BuildPipeline) -> mpsc::UnboundedReceiver<BuildResult> {
    let (tx, rx) = mpsc::unbounded_channel();
    pipeline.add_callback(move |result| {
        let _ = tx.send(result.clone());
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<BuildResult>) -> BuildResult {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a build result")
        .expect("result channel closed")
}

fn component_file(dir: &TempDir, name: &str, source: &str) -> Arc<ComponentInfo> {
    let path = dir.path().join(format!("{name}.tsx"));
    std::fs::write(&path, source).unwrap();
    Arc::new(ComponentInfo::new(name, path))
}

#[tokio::test]
async fn test_second_build_hits_cache_with_identical_output() {
    let dir = TempDir::new().unwrap();
    let card = component_file(&dir, "Card", "export const Card = () => <div/>;");
    let compiles = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&compiles);

    let pipeline = pipeline(
        BuildConfig::default(),
        move |component: &ComponentInfo| -> Result<Vec<u8>, String> {
            counter.fetch_add(1, Ordering::SeqCst);
            echo(component)
        },
    );
    let mut results = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    pipeline.build(Arc::clone(&card)).await.unwrap();
    let first = next(&mut results).await;
    pipeline.build(Arc::clone(&card)).await.unwrap();
    let second = next(&mut results).await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.output, second.output);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(&*first.output, b"compiled:Card");
    assert_eq!(compiles.load(Ordering::SeqCst), 1);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_changed_source_misses_cache() {
    let dir = TempDir::new().unwrap();
    let card = component_file(&dir, "Card", "export const Card = () => <div/>;");

    let pipeline = pipeline(BuildConfig::default(), echo);
    let mut results = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    pipeline.build(Arc::clone(&card)).await.unwrap();
    let first = next(&mut results).await;

    std::fs::write(&card.file_path, "export const Card = () => <section/>;").unwrap();
    pipeline.build(Arc::clone(&card)).await.unwrap();
    let second = next(&mut results).await;

    assert!(!second.cache_hit);
    assert_ne!(first.content_hash, second.content_hash);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_elevated_tasks_run_first() {
    let pipeline = pipeline(config(1, 16, Backpressure::Reject), echo);
    let mut results = collect_results(&pipeline);

    // Queued before start so the single worker sees all three at once.
    for name in ["Normal1", "Normal2"] {
        pipeline
            .build(Arc::new(ComponentInfo::new(name, format!("{name}.tsx"))))
            .await
            .unwrap();
    }
    pipeline
        .build_with_priority(Arc::new(ComponentInfo::new("Urgent", "Urgent.tsx")))
        .await
        .unwrap();
    assert_eq!(pipeline.queue_len(), 3);

    pipeline.start(&CancellationToken::new()).unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let result = next(&mut results).await;
        order.push((result.component.name.clone(), result.priority));
    }

    assert_eq!(
        order,
        vec![
            ("Urgent".to_string(), BuildPriority::Elevated),
            ("Normal1".to_string(), BuildPriority::Normal),
            ("Normal2".to_string(), BuildPriority::Normal),
        ]
    );
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_compile_error_does_not_stop_other_builds() {
    let pipeline = pipeline(
        config(2, 16, Backpressure::Reject),
        |component: &ComponentInfo| -> Result<Vec<u8>, String> {
            if component.name == "Broken" {
                Err("unexpected token".to_string())
            } else {
                echo(component)
            }
        },
    );
    let mut results = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    for name in ["Broken", "Good", "AlsoGood"] {
        pipeline
            .build(Arc::new(ComponentInfo::new(name, format!("{name}.tsx"))))
            .await
            .unwrap();
    }

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let result = next(&mut results).await;
        outcomes.push((result.component.name.clone(), result.error.clone()));
    }
    outcomes.sort();

    assert_eq!(
        outcomes,
        vec![
            ("AlsoGood".to_string(), None),
            ("Broken".to_string(), Some("unexpected token".to_string())),
            ("Good".to_string(), None),
        ]
    );

    pipeline.stop().await.unwrap();
    let metrics = pipeline.metrics();
    assert_eq!(metrics.total_builds, 3);
    assert_eq!(metrics.successful_builds, 2);
    assert_eq!(metrics.failed_builds, 1);
    assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_saturated_queue_rejects() {
    let pipeline = pipeline(config(1, 2, Backpressure::Reject), echo);
    let component = |name: &str| Arc::new(ComponentInfo::new(name, format!("{name}.tsx")));

    pipeline.build(component("A")).await.unwrap();
    pipeline.build(component("B")).await.unwrap();

    assert_eq!(
        pipeline.build(component("C")).await.unwrap_err(),
        PipelineError::QueueFull { capacity: 2 }
    );
    assert_eq!(
        pipeline
            .try_build(component("D"), BuildPriority::Elevated)
            .unwrap_err(),
        PipelineError::QueueFull { capacity: 2 }
    );
    assert_eq!(pipeline.queue_len(), 2);
}

#[tokio::test]
async fn test_blocking_backpressure_waits_for_space() {
    let pipeline = Arc::new(pipeline(config(1, 1, Backpressure::Block), echo));
    let mut results = collect_results(&pipeline);

    pipeline
        .build(Arc::new(ComponentInfo::new("A", "A.tsx")))
        .await
        .unwrap();

    let waiting = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .build(Arc::new(ComponentInfo::new("B", "B.tsx")))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished(), "enqueue should block on a full queue");

    pipeline.start(&CancellationToken::new()).unwrap();
    tokio::time::timeout(WAIT, waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let mut names = vec![
        next(&mut results).await.component.name.clone(),
        next(&mut results).await.component.name.clone(),
    ];
    names.sort();
    assert_eq!(names, vec!["A", "B"]);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_delivers_in_flight_build() {
    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
    let started_tx = parking_lot::Mutex::new(started_tx);

    let pipeline = pipeline(
        config(1, 8, Backpressure::Reject),
        move |component: &ComponentInfo| -> Result<Vec<u8>, String> {
            let _ = started_tx.lock().send(());
            std::thread::sleep(Duration::from_millis(100));
            echo(component)
        },
    );
    let mut results = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    pipeline
        .build(Arc::new(ComponentInfo::new("Slow", "Slow.tsx")))
        .await
        .unwrap();
    pipeline
        .build(Arc::new(ComponentInfo::new("Queued", "Queued.tsx")))
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || started_rx.recv_timeout(WAIT))
        .await
        .unwrap()
        .unwrap();
    pipeline.stop().await.unwrap();

    let delivered = results.try_recv().expect("in-flight build was lost");
    assert_eq!(delivered.component.name, "Slow");
    assert!(delivered.is_success());
    assert!(results.try_recv().is_err(), "queued task should be abandoned");
    assert_eq!(pipeline.metrics().total_builds, 1);

    assert_eq!(
        pipeline.try_build(Arc::new(ComponentInfo::new("Late", "Late.tsx")), BuildPriority::Normal),
        Err(PipelineError::Stopped)
    );
}

#[tokio::test]
async fn test_parent_token_cancels_workers() {
    let pipeline = pipeline(BuildConfig::default(), echo);
    let token = CancellationToken::new();
    pipeline.start(&token).unwrap();
    assert!(pipeline.is_running());

    token.cancel();

    // Once the queue is closed nothing can be enqueued without a worker to run it.
    tokio::time::timeout(WAIT, async {
        loop {
            let component = Arc::new(ComponentInfo::new("Late", "Late.tsx"));
            match pipeline.build(component).await {
                Err(PipelineError::Stopped) => break,
                Ok(()) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(other) => panic!("unexpected enqueue error: {other}"),
            }
        }
    })
    .await
    .expect("queue stayed open after cancellation");

    assert!(!pipeline.is_running());
    assert!(matches!(
        pipeline.build_with_priority(Arc::new(ComponentInfo::new("Late", "Late.tsx"))).await,
        Err(PipelineError::Stopped)
    ));
    assert!(matches!(
        pipeline.try_build(Arc::new(ComponentInfo::new("Late", "Late.tsx")), BuildPriority::Normal),
        Err(PipelineError::Stopped)
    ));
    assert_eq!(pipeline.queue_len(), 0);

    tokio::time::timeout(WAIT, pipeline.stop())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_every_callback_sees_every_result() {
    let pipeline = pipeline(BuildConfig::default(), echo);
    let mut first = collect_results(&pipeline);
    let mut second = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    pipeline
        .build(Arc::new(ComponentInfo::new("A", "A.tsx")))
        .await
        .unwrap();

    assert_eq!(next(&mut first).await.component.name, "A");
    assert_eq!(next(&mut second).await.component.name, "A");
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_clear_cache_forces_rebuild() {
    let dir = TempDir::new().unwrap();
    let button = component_file(&dir, "Button", "export const Button = () => <button/>;");

    let pipeline = pipeline(BuildConfig::default(), echo);
    let mut results = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    pipeline.build(Arc::clone(&button)).await.unwrap();
    next(&mut results).await;
    assert_eq!(pipeline.cache().len(), 1);

    pipeline.clear_cache();
    assert!(pipeline.cache().is_empty());
    assert_eq!(pipeline.cache().hits(), 0);

    pipeline.build(Arc::clone(&button)).await.unwrap();
    assert!(!next(&mut results).await.cache_hit);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_metrics_track_cache_hit_rate() {
    let dir = TempDir::new().unwrap();
    let card = component_file(&dir, "Card", "export const Card = () => null;");

    let pipeline = pipeline(BuildConfig::default(), echo);
    let mut results = collect_results(&pipeline);
    pipeline.start(&CancellationToken::new()).unwrap();

    for _ in 0..4 {
        pipeline.build(Arc::clone(&card)).await.unwrap();
        next(&mut results).await;
    }
    pipeline.stop().await.unwrap();

    let metrics = pipeline.metrics();
    assert_eq!(metrics.total_builds, 4);
    assert_eq!(metrics.cache_hits, 3);
    assert!((metrics.cache_hit_rate - 0.75).abs() < 1e-9);
    assert_eq!(metrics.success_rate, 1.0);

    let json = serde_json::to_value(metrics).unwrap();
    assert_eq!(json["totalBuilds"], 4);
}
