use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;

use crate::config::DisplaySettings;
use crate::error::{AppError, EngineError, PipelineError, SourceError};
use crate::pipeline::controller::{INITIALIZED_MESSAGE, INITIALIZING_MESSAGE, NO_DEVICES_MESSAGE};
use crate::pipeline::{PipelineController, PipelineState};
use crate::render::DisplayContext;
use crate::source::{FileFrameSource, FrameSource, SourceFactory, SourceRequest};
use crate::testing::{
    Harness, ManualFrameSource, ScriptedFactory, cpu, eventually, gpu, wait_for_state,
};

async fn running_harness() -> (Harness, Arc<ManualFrameSource>) {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    let source = ManualFrameSource::new("camera", harness.log());
    harness.controller.attach(source.clone()).await.unwrap();
    assert_eq!(harness.controller.state(), PipelineState::Running);
    (harness, source)
}

fn clip(frames: usize, interval: Duration) -> Arc<FileFrameSource> {
    let images = (0..frames).map(|_| DynamicImage::new_rgb8(32, 24)).collect();
    Arc::new(FileFrameSource::from_images("clip", images, interval, false).unwrap())
}

#[tokio::test]
async fn initialize_announces_skill_and_builds_default_engine() {
    let harness = Harness::new();
    let skill = harness.controller.initialize().await.unwrap();

    assert_eq!(skill.name, "Scripted skill");
    assert_eq!(
        harness.notifier.messages(),
        vec![INITIALIZING_MESSAGE.to_string(), INITIALIZED_MESSAGE.to_string()]
    );
    assert_eq!(harness.controller.devices().await, vec![cpu(), gpu()]);
    assert_eq!(harness.controller.current_device().await, Some(cpu()));
    assert_eq!(harness.controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn initialize_without_devices_says_so() {
    let harness = Harness::with_devices(Vec::new());
    let result = harness.controller.initialize().await;

    assert!(matches!(result, Err(AppError::Pipeline(PipelineError::NoEngine))));
    assert_eq!(harness.notifier.count(NO_DEVICES_MESSAGE), 1);
    assert_eq!(harness.notifier.count(INITIALIZED_MESSAGE), 0);
    assert_eq!(harness.controller.current_device().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_engine_analyzes_one_of_ten_file_frames() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    harness.control.hold_evaluations();

    harness
        .controller
        .attach(clip(10, Duration::from_millis(20)))
        .await
        .unwrap();
    let mut states = harness.controller.subscribe_state();
    assert!(eventually(|| harness.controller.stats().frames_received == 10).await);

    harness.control.release_evaluations();
    wait_for_state(&mut states, PipelineState::Idle).await;
    harness.controller.drain().await;

    let stats = harness.controller.stats();
    assert_eq!(harness.log().count("bind:"), 1);
    assert_eq!(stats.passes_completed, 1);
    assert_eq!(stats.frames_dropped, 9);
    assert_eq!(harness.display.snapshot().await.unwrap().presented, 1);
    assert!(
        eventually(|| harness.notifier.count("End of stream reached for clip") == 1).await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_ten_frames_analyzes_only_the_first() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    harness.control.hold_evaluations();

    harness
        .controller
        .attach(clip(10, Duration::ZERO))
        .await
        .unwrap();
    let mut states = harness.controller.subscribe_state();
    assert!(eventually(|| harness.controller.stats().frames_received == 10).await);
    assert!(eventually(|| harness.log().count("evaluate_start") == 1).await);
    assert!(eventually(|| harness.controller.stats().frames_dropped == 9).await);

    harness.control.release_evaluations();
    wait_for_state(&mut states, PipelineState::Idle).await;
    harness.controller.drain().await;

    let stats = harness.controller.stats();
    assert_eq!(harness.log().count("bind:"), 1);
    assert_eq!(stats.passes_completed, 1);
    assert_eq!(stats.frames_dropped, 9);
    assert_eq!(harness.display.snapshot().await.unwrap().presented, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fast_engine_analyzes_every_file_frame() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();

    harness
        .controller
        .attach(clip(10, Duration::from_millis(30)))
        .await
        .unwrap();
    let mut states = harness.controller.subscribe_state();
    wait_for_state(&mut states, PipelineState::Idle).await;
    harness.controller.drain().await;

    let stats = harness.controller.stats();
    assert_eq!(harness.log().count("bind:"), 10);
    assert_eq!(stats.passes_completed, 10);
    assert_eq!(stats.frames_dropped, 0);
    let snapshot = harness.display.snapshot().await.unwrap();
    assert_eq!(snapshot.presented, 10);
    assert_eq!(snapshot.last_sequence, Some(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn device_switch_waits_for_in_flight_evaluation() {
    let (harness, source) = running_harness().await;
    harness.control.hold_evaluations();
    assert!(source.push());
    assert!(eventually(|| harness.log().position("evaluate_start:cpu-0").is_some()).await);

    let controller = harness.controller.clone();
    let switch = tokio::spawn(async move { controller.set_execution_device(gpu()).await });
    assert!(eventually(|| harness.controller.state() == PipelineState::Reconfiguring).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.log().position("create:gpu-0").is_none());
    assert!(!switch.is_finished());

    // arrives after the switch began, must not reach either engine
    source.push();
    harness.control.release_evaluations();
    switch.await.unwrap().unwrap();

    let log = harness.log();
    let drained = log.position("evaluate_end:cpu-0").unwrap();
    let rebuilt = log.position("create:gpu-0").unwrap();
    assert!(drained < rebuilt);
    assert_eq!(log.count("bind:"), 1);

    assert_eq!(harness.controller.state(), PipelineState::Running);
    assert!(source.is_running());
    source.push();
    harness.controller.drain().await;
    assert_eq!(log.count("bind:cpu-0"), 1);
    assert_eq!(log.count("bind:gpu-0"), 1);
    assert_eq!(harness.controller.current_device().await, Some(gpu()));
}

#[tokio::test]
async fn unavailable_device_keeps_current_engine() {
    let (harness, source) = running_harness().await;
    harness.control.set_unavailable("gpu-0");

    let result = harness.controller.set_execution_device(gpu()).await;
    assert!(matches!(
        result,
        Err(AppError::Engine(EngineError::DeviceUnavailable(_)))
    ));
    assert_eq!(
        harness
            .notifier
            .count("Execution device 'GPU | gpu-0' is unavailable"),
        1
    );
    assert_eq!(harness.controller.state(), PipelineState::Running);
    assert_eq!(harness.controller.current_device().await, Some(cpu()));

    source.push();
    harness.controller.drain().await;
    assert_eq!(harness.log().count("bind:cpu-0"), 1);
}

#[tokio::test]
async fn no_constructible_engine_leaves_pipeline_idle() {
    let harness = Harness::new();
    harness.control.set_unavailable("cpu-0");
    let source = ManualFrameSource::new("camera", harness.log());

    let result = harness.controller.attach(source.clone()).await;
    assert!(matches!(result, Err(AppError::Engine(_))));
    assert_eq!(harness.controller.state(), PipelineState::Idle);
    assert!(source.is_disposed());
    assert!(!source.push());
}

#[tokio::test]
async fn switch_with_no_usable_device_left_goes_idle() {
    let (harness, source) = running_harness().await;
    harness.control.set_unavailable("cpu-0");
    harness.control.set_unavailable("gpu-0");
    let before = harness.notifier.messages().len();

    let result = harness.controller.set_execution_device(gpu()).await;
    assert!(matches!(
        result,
        Err(AppError::Engine(EngineError::DeviceUnavailable(_)))
    ));
    assert_eq!(harness.controller.state(), PipelineState::Idle);
    assert!(source.is_disposed());
    assert!(!source.push());
    assert_eq!(harness.notifier.messages().len(), before + 1);
    assert_eq!(harness.controller.current_device().await, None);
    assert!(harness.controller.devices().await.is_empty());
    assert_eq!(harness.display.snapshot().await.unwrap().active_generation, None);
}

#[tokio::test]
async fn source_that_cannot_start_is_released_and_reported() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    let source = ManualFrameSource::new("broken", harness.log());
    source.dispose().await;

    let result = harness.controller.attach(source.clone()).await;
    assert!(matches!(result, Err(AppError::Source(SourceError::Fatal(_)))));
    assert_eq!(harness.controller.state(), PipelineState::Idle);
    assert_eq!(harness.notifier.count("Frame source failed: broken disposed"), 1);
    assert!(!source.push());
    assert_eq!(harness.display.snapshot().await.unwrap().active_generation, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_source_failure_goes_idle_and_notifies_once() {
    let (harness, source) = running_harness().await;
    let mut states = harness.controller.subscribe_state();

    source.fail(SourceError::Fatal("camera unplugged".to_string()));
    wait_for_state(&mut states, PipelineState::Idle).await;

    let text = "Frame source failed: camera unplugged";
    assert!(eventually(|| harness.notifier.count(text) == 1).await);
    source.fail(SourceError::Fatal("camera unplugged".to_string()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.notifier.count(text), 1);

    assert!(source.is_disposed());
    assert!(!source.push());
    assert_eq!(harness.log().count("bind:"), 0);
    assert_eq!(harness.display.snapshot().await.unwrap().active_generation, None);
}

#[tokio::test]
async fn evaluation_failure_skips_render_and_releases_gate() {
    let (harness, source) = running_harness().await;
    harness.control.fail_next_evaluation();

    assert!(source.push());
    harness.controller.drain().await;

    let snapshot = harness.display.snapshot().await.unwrap();
    assert_eq!(snapshot.presented, 0);
    assert_eq!(snapshot.renderer_updates, 0);
    assert_eq!(harness.controller.gate_stats().in_flight(), 0);
    assert_eq!(harness.notifier.count("Evaluation failed: cpu-0 went away"), 1);
    assert_eq!(harness.controller.stats().passes_failed, 1);
    assert_eq!(harness.controller.state(), PipelineState::Running);

    assert!(source.push());
    harness.controller.drain().await;
    assert_eq!(harness.display.snapshot().await.unwrap().presented, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passes_never_overlap() {
    let (harness, source) = running_harness().await;
    harness.control.set_evaluation_delay(Duration::from_millis(2));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let source = source.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..50 {
                    source.push();
                    std::thread::sleep(Duration::from_micros(300));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    harness.controller.drain().await;

    assert_eq!(harness.control.max_active(), 1);
    let stats = harness.controller.stats();
    assert_eq!(stats.frames_received, 200);
    assert!(stats.passes_completed >= 1);
    assert_eq!(stats.passes_completed + stats.frames_dropped, 200);

    let evaluations: Vec<String> = harness
        .log()
        .entries()
        .into_iter()
        .filter(|entry| entry.starts_with("evaluate_"))
        .collect();
    for pair in evaluations.chunks(2) {
        assert_eq!(pair[0], "evaluate_start:cpu-0");
        assert_eq!(pair[1], "evaluate_end:cpu-0");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_frame_is_dropped_without_waiting() {
    let (harness, source) = running_harness().await;
    harness.control.hold_evaluations();
    assert!(source.push());
    assert!(eventually(|| harness.log().count("evaluate_start") == 1).await);

    let started = Instant::now();
    assert!(source.push());
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(harness.controller.stats().frames_dropped, 1);

    harness.control.release_evaluations();
    harness.controller.drain().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.log().count("bind:"), 1);
    assert_eq!(harness.controller.stats().passes_completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn old_source_is_disposed_after_in_flight_pass() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    let old = ManualFrameSource::new("old", harness.log());
    harness.controller.attach(old.clone()).await.unwrap();

    harness.control.hold_evaluations();
    assert!(old.push());
    assert!(eventually(|| harness.log().count("evaluate_start") == 1).await);

    let new = ManualFrameSource::new("new", harness.log());
    let controller = harness.controller.clone();
    let replacement = new.clone();
    let attach = tokio::spawn(async move { controller.attach(replacement).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!old.is_disposed());
    assert!(!attach.is_finished());

    harness.control.release_evaluations();
    attach.await.unwrap().unwrap();

    let log = harness.log();
    let drained = log.position("evaluate_end:cpu-0").unwrap();
    let disposed = log.position("dispose:old").unwrap();
    let started = log.position("start:new").unwrap();
    assert!(drained < disposed);
    assert!(disposed < started);

    let snapshot = harness.display.snapshot().await.unwrap();
    assert_eq!(snapshot.presented, 1);
    assert_eq!(snapshot.active_generation, Some(2));
    assert!(!snapshot.overlay_visible);
    assert!(!old.push());
    assert!(new.is_running());
}

#[tokio::test]
async fn gate_is_released_for_every_pass_outcome() {
    let (harness, source) = running_harness().await;

    harness.control.fail_next_bind();
    source.push();
    harness.controller.drain().await;

    harness.control.fail_next_evaluation();
    source.push();
    harness.controller.drain().await;

    harness.control.panic_next_evaluation();
    source.push();
    harness.controller.drain().await;

    source.push();
    harness.controller.drain().await;

    let gate = harness.controller.gate_stats();
    assert_eq!(gate.in_flight(), 0);
    assert_eq!(gate.acquisitions, gate.releases);

    let stats = harness.controller.stats();
    assert_eq!(stats.passes_failed, 3);
    assert_eq!(stats.passes_completed, 1);
    assert_eq!(harness.controller.state(), PipelineState::Running);

    let messages = harness.notifier.messages();
    assert!(messages.iter().any(|m| m.starts_with("Failed to bind frame")));
    assert!(messages.iter().any(|m| m == "Evaluation failed: cpu-0 went away"));
    assert!(
        messages
            .iter()
            .any(|m| m == "Analysis pass panicked: scripted evaluation panic")
    );
}

#[tokio::test]
async fn results_render_in_completion_order() {
    let (harness, source) = running_harness().await;
    for _ in 0..5 {
        source.push();
        harness.controller.drain().await;
    }

    let snapshot = harness.display.snapshot().await.unwrap();
    assert_eq!(snapshot.presented, 5);
    assert_eq!(snapshot.stale, 0);
    assert_eq!(snapshot.last_sequence, Some(5));
    assert!(snapshot.overlay_visible);
    assert!(
        snapshot
            .status_text
            .is_some_and(|text| text.starts_with("Found 1 bodies (bind: "))
    );
}

#[tokio::test]
async fn detach_then_shutdown() {
    let (harness, source) = running_harness().await;

    harness.controller.detach().await;
    assert_eq!(harness.controller.state(), PipelineState::Idle);
    assert!(source.is_disposed());
    assert_eq!(harness.controller.current_device().await, Some(cpu()));

    let next = ManualFrameSource::new("next", harness.log());
    harness.controller.attach(next.clone()).await.unwrap();
    assert_eq!(harness.controller.state(), PipelineState::Running);

    harness.controller.shutdown().await;
    assert_eq!(harness.controller.state(), PipelineState::Idle);
    assert!(next.is_disposed());
    assert_eq!(harness.controller.current_device().await, None);

    let late = ManualFrameSource::new("late", harness.log());
    let result = harness.controller.attach(late.clone()).await;
    assert!(matches!(result, Err(AppError::Pipeline(PipelineError::ShutDown))));
    assert!(late.is_disposed());
}

#[tokio::test]
async fn construction_failure_is_notified() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    let sources = SourceFactory::new(Duration::from_millis(10));

    let result = harness
        .controller
        .open_and_attach(
            &sources,
            SourceRequest::Camera {
                device_id: "missing".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Source(SourceError::Construction(_)))));
    assert_eq!(
        harness
            .notifier
            .count("Failed to construct frame source: unknown camera 'missing'"),
        1
    );
    assert_eq!(harness.controller.state(), PipelineState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pattern_camera_feeds_the_pipeline() {
    let harness = Harness::new();
    harness.controller.initialize().await.unwrap();
    let sources = SourceFactory::new(Duration::from_millis(10));

    harness
        .controller
        .open_and_attach(
            &sources,
            SourceRequest::Camera {
                device_id: "test-pattern".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(eventually(|| harness.controller.stats().passes_completed >= 3).await);

    harness.controller.detach().await;
    let snapshot = harness.display.snapshot().await.unwrap();
    assert!(snapshot.presented >= 3);
    assert_eq!(snapshot.active_generation, None);
    assert_eq!(harness.controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn display_notifier_keeps_every_message_with_a_tiny_queue() {
    let (display, _task) = DisplayContext::spawn(&DisplaySettings::default(), 0.5, 1);
    let controller = PipelineController::builder(Arc::new(ScriptedFactory::new(vec![cpu()])))
        .display(display.clone())
        .build()
        .unwrap();

    controller.initialize().await.unwrap();
    let snapshot = display.snapshot().await.unwrap();
    assert_eq!(
        snapshot.messages,
        vec![INITIALIZING_MESSAGE.to_string(), INITIALIZED_MESSAGE.to_string()]
    );
}
