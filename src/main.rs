use std::sync::Arc;
use std::time::Duration;

use skill_pipeline::PipelineController;
use skill_pipeline::config::Settings;
use skill_pipeline::engine::{SimulatedDevices, SimulatedSkillFactory};
use skill_pipeline::error::AppError;
use skill_pipeline::render::DisplayContext;
use skill_pipeline::source::{SourceFactory, SourceRequest};
use tracing::{Level, error, info, warn};

fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings = Settings::load()?;
    init_logging(&settings.log_level);

    let (display, display_task) = DisplayContext::spawn(
        &settings.display,
        settings.pipeline.smoothing_factor,
        settings.pipeline.display_queue_capacity,
    );
    let factory = SimulatedSkillFactory::new(SimulatedDevices::default()).with_latency(
        Duration::from_millis(settings.engine.bind_latency_ms),
        Duration::from_millis(settings.engine.eval_latency_ms),
    );
    let controller = PipelineController::builder(Arc::new(factory))
        .display(display.clone())
        .build()?;

    let skill = controller.initialize().await?;
    info!("Running {} v{}.{}", skill.name, skill.version.major, skill.version.minor);

    if let Some(name) = &settings.engine.device {
        let devices = controller.devices().await;
        match devices.into_iter().find(|device| &device.name == name) {
            Some(device) => controller.set_execution_device(device).await?,
            None => warn!("Execution device '{}' not found, keeping the default", name),
        }
    }
    if let Some(device) = controller.current_device().await {
        info!("Analysis runs on {}", device);
    }

    let sources = SourceFactory::new(settings.source.frame_interval());
    if let Some(request) = SourceRequest::from_settings(&settings.source) {
        if let Err(e) = controller.open_and_attach(&sources, request).await {
            error!("Could not attach media source: {}", e);
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(settings.run_seconds)) => {
            info!("Run time of {}s elapsed", settings.run_seconds);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    controller.shutdown().await;
    let stats = controller.stats();
    info!(
        "Frames received: {}, dropped: {} ({:.1}%), passes: {} ok / {} failed",
        stats.frames_received,
        stats.frames_dropped,
        stats.drop_rate() * 100.0,
        stats.passes_completed,
        stats.passes_failed
    );
    info!(
        "Bind avg {:.0}us max {}us, eval avg {:.0}us max {}us",
        stats.avg_bind_us, stats.max_bind_us, stats.avg_evaluate_us, stats.max_evaluate_us
    );
    let snapshot = display.snapshot().await?;
    if let Some(status) = snapshot.status_text {
        info!("Last result: {}", status);
    }

    drop(display);
    drop(controller);
    match tokio::time::timeout(Duration::from_secs(1), display_task).await {
        Ok(Err(e)) => error!("Display task failed: {}", e),
        Err(_) => warn!("Display task did not stop in time"),
        Ok(Ok(())) => {}
    }
    Ok(())
}
