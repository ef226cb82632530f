use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::common::{ExecutionDeviceDescriptor, Frame, device};
use crate::engine::{
    AnalysisEngine, AnalysisResult, EngineFactory, PassLatency, SkeletalBody, SkillInfo,
};
use crate::error::{AppError, EngineError, PipelineError, SourceError};
use crate::notify::Notifier;
use crate::pipeline::gate::{ExecutionGate, GatePermit, GateStats};
use crate::pipeline::metrics::{
    MetricsCollector, MetricsObserver, PerformanceMonitor, PerformanceStats,
};
use crate::pipeline::state::PipelineState;
use crate::render::{DisplayHandle, PresentOutcome};
use crate::source::{FrameSource, SourceFactory, SourceRequest};

pub const INITIALIZING_MESSAGE: &str = "Initializing skill...";
pub const INITIALIZED_MESSAGE: &str = "Skill initialized. Select a media source to begin.";
pub const NO_DEVICES_MESSAGE: &str =
    "No execution devices available on this system, please review the skill and device configuration";

/// Which source and engine are canonical. Only reachable through the gate.
#[derive(Default)]
struct Canonical {
    source: Option<Arc<dyn FrameSource>>,
    engine: Option<Box<dyn AnalysisEngine>>,
    generation: u64,
    devices: Vec<ExecutionDeviceDescriptor>,
    shut_down: bool,
}

impl Canonical {
    fn settled_state(&self) -> PipelineState {
        if self.source.is_some() && self.engine.is_some() {
            PipelineState::Running
        } else {
            PipelineState::Idle
        }
    }
}

struct Shared {
    gate: ExecutionGate<Canonical>,
    state: watch::Sender<PipelineState>,
    reconfigurations: Mutex<Reconfigurations>,
    generation: AtomicU64,
    sequence: AtomicU64,
    factory: Arc<dyn EngineFactory>,
    notifier: Arc<dyn Notifier>,
    display: DisplayHandle,
    runtime: Handle,
    metrics: MetricsCollector,
    monitor: Arc<PerformanceMonitor>,
}

/// Drives frames from the attached source through the analysis engine to the
/// display, one pass at a time, and swaps sources and devices safely.
///
/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct PipelineController {
    shared: Arc<Shared>,
}

pub struct PipelineControllerBuilder {
    factory: Arc<dyn EngineFactory>,
    display: Option<DisplayHandle>,
    notifier: Option<Arc<dyn Notifier>>,
    observers: Vec<Arc<dyn MetricsObserver>>,
}

impl PipelineControllerBuilder {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            display: None,
            notifier: None,
            observers: Vec::new(),
        }
    }

    pub fn display(mut self, display: DisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    // Overrides the default of notifying through the display.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn MetricsObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Must be called from within a tokio runtime; analysis passes are spawned on it.
    pub fn build(self) -> Result<PipelineController, AppError> {
        let display = self.display.ok_or(PipelineError::Incomplete("display"))?;
        let runtime =
            Handle::try_current().map_err(|e| PipelineError::NoRuntime(e.to_string()))?;
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(display.clone()) as Arc<dyn Notifier>);

        let monitor = Arc::new(PerformanceMonitor::new());
        let metrics = self.observers.into_iter().fold(
            MetricsCollector::new().add_observer(monitor.clone()),
            |collector, observer| collector.add_observer(observer),
        );
        let (state, _) = watch::channel(PipelineState::Idle);

        Ok(PipelineController {
            shared: Arc::new(Shared {
                gate: ExecutionGate::new(Canonical::default()),
                state,
                reconfigurations: Mutex::new(Reconfigurations::default()),
                generation: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
                factory: self.factory,
                notifier,
                display,
                runtime,
                metrics,
                monitor,
            }),
        })
    }
}

impl PipelineController {
    pub fn builder(factory: Arc<dyn EngineFactory>) -> PipelineControllerBuilder {
        PipelineControllerBuilder::new(factory)
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.shared.state.subscribe()
    }

    pub fn skill_info(&self) -> SkillInfo {
        self.shared.factory.skill_info()
    }

    pub fn stats(&self) -> PerformanceStats {
        self.shared.monitor.stats()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.shared.gate.stats()
    }

    /// Announce the skill, enumerate execution devices and build the engine on
    /// the default device.
    pub async fn initialize(&self) -> Result<SkillInfo, AppError> {
        let shared = &self.shared;
        shared.notifier.notify(INITIALIZING_MESSAGE);
        let skill = shared.factory.skill_info();
        info!("Skill: {}", skill.name);
        debug!("{}", skill);

        let mut reconfiguration = Reconfiguration::begin(shared);
        shared
            .initialize_locked(reconfiguration.lock().await)
            .await?;
        drop(reconfiguration);
        shared.notifier.notify(INITIALIZED_MESSAGE);
        Ok(skill)
    }

    /// Replace the current source, if any, with `source` and start it.
    ///
    /// The source is started only after the pipeline is `Running` and the
    /// gate is free, so its very first frame can be analyzed.
    pub async fn attach(&self, source: Arc<dyn FrameSource>) -> Result<(), AppError> {
        let mut reconfiguration = Reconfiguration::begin(&self.shared);
        let canonical = reconfiguration.lock().await;
        let generation = self
            .shared
            .attach_locked(canonical, Arc::clone(&source))
            .await?;
        drop(reconfiguration);
        self.shared.start_attached(source, generation).await
    }

    /// Build a source for `request` and attach it. Construction failures are
    /// reported through the notifier as well as returned.
    pub async fn open_and_attach(
        &self,
        sources: &SourceFactory,
        request: SourceRequest,
    ) -> Result<(), AppError> {
        match sources.create(request).await {
            Ok(source) => self.attach(source).await,
            Err(e) => {
                self.shared.notifier.notify(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Rebuild the engine on `device`. When the device cannot be used the
    /// current engine stays in place.
    pub async fn set_execution_device(
        &self,
        device: ExecutionDeviceDescriptor,
    ) -> Result<(), AppError> {
        let mut reconfiguration = Reconfiguration::begin(&self.shared);
        let canonical = reconfiguration.lock().await;
        self.shared.switch_device_locked(canonical, device).await
    }

    /// Stop and release the current source. The engine is kept.
    pub async fn detach(&self) {
        let mut reconfiguration = Reconfiguration::begin(&self.shared);
        let canonical = reconfiguration.lock().await;
        self.shared.teardown_source(canonical).await;
    }

    /// Detach, drop the engine and refuse any further reconfiguration.
    pub async fn shutdown(&self) {
        let mut reconfiguration = Reconfiguration::begin(&self.shared);
        let canonical = reconfiguration.lock().await;
        self.shared.teardown_source(canonical).await;
        canonical.engine = None;
        canonical.shut_down = true;
        drop(reconfiguration);
        info!("Pipeline shut down");
    }

    /// Re-enumerate execution devices. Never overlaps an analysis pass.
    pub async fn refresh_devices(&self) -> Vec<ExecutionDeviceDescriptor> {
        let mut canonical = self.shared.gate.acquire_blocking().await;
        canonical.devices = self.shared.factory.list_execution_devices().await;
        debug!("Refreshed {} execution device(s)", canonical.devices.len());
        canonical.devices.clone()
    }

    /// Devices found by the last enumeration.
    pub async fn devices(&self) -> Vec<ExecutionDeviceDescriptor> {
        self.shared.gate.acquire_blocking().await.devices.clone()
    }

    /// The enumerated device the current engine runs on.
    pub async fn current_device(&self) -> Option<ExecutionDeviceDescriptor> {
        let canonical = self.shared.gate.acquire_blocking().await;
        let engine = canonical.engine.as_ref()?;
        device::position_of(&canonical.devices, engine.device())
            .map(|index| canonical.devices[index].clone())
    }

    /// Wait until the pass in flight, if any, has finished.
    pub async fn drain(&self) {
        self.shared.gate.acquire_blocking().await.release();
    }

    /// Hot path for a frame of the current source. Never waits: when a pass
    /// is already running the frame is dropped.
    pub fn on_frame_arrived(&self, frame: Frame) {
        let generation = self.shared.generation.load(Ordering::Acquire);
        Shared::frame_arrived(&self.shared, generation, frame);
    }
}

#[derive(Debug, Default)]
struct Reconfigurations {
    pending: usize,
    settled: PipelineState,
}

/// One source or device swap. Creating it flips the pipeline to
/// `Reconfiguring` so newly arriving frames are ignored; dropping it
/// publishes the settled state and then releases the gate.
struct Reconfiguration<'a> {
    shared: &'a Shared,
    canonical: Option<GatePermit<Canonical>>,
}

impl<'a> Reconfiguration<'a> {
    fn begin(shared: &'a Shared) -> Self {
        let mut reconfigurations = shared.reconfigurations();
        reconfigurations.pending += 1;
        shared.publish_state(PipelineState::Reconfiguring);
        drop(reconfigurations);
        Self {
            shared,
            canonical: None,
        }
    }

    /// Wait for the pass in flight to drain, then hold the gate.
    async fn lock(&mut self) -> &mut Canonical {
        let permit = self.shared.gate.acquire_blocking().await;
        &mut **self.canonical.insert(permit)
    }
}

impl Drop for Reconfiguration<'_> {
    fn drop(&mut self) {
        let mut reconfigurations = self.shared.reconfigurations();
        reconfigurations.pending = reconfigurations.pending.saturating_sub(1);
        if let Some(canonical) = &self.canonical {
            reconfigurations.settled = canonical.settled_state();
        }
        if reconfigurations.pending == 0 {
            self.shared.publish_state(reconfigurations.settled);
        }
    }
}

impl Shared {
    fn reconfigurations(&self) -> std::sync::MutexGuard<'_, Reconfigurations> {
        self.reconfigurations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the settled state unless a reconfiguration is waiting for the gate.
    fn settle(&self, canonical: &Canonical) {
        let mut reconfigurations = self.reconfigurations();
        reconfigurations.settled = canonical.settled_state();
        if reconfigurations.pending == 0 {
            self.publish_state(reconfigurations.settled);
        }
    }

    fn publish_state(&self, state: PipelineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Pipeline state {} -> {}", previous, state);
        }
    }

    async fn initialize_locked(&self, canonical: &mut Canonical) -> Result<(), AppError> {
        if canonical.shut_down {
            return Err(PipelineError::ShutDown.into());
        }
        canonical.devices = self.factory.list_execution_devices().await;
        if canonical.devices.is_empty() {
            self.notifier.notify(NO_DEVICES_MESSAGE);
            return Err(PipelineError::NoEngine.into());
        }
        match self.factory.create(None).await {
            Ok(engine) => {
                info!("Analysis engine ready on {}", engine.device());
                canonical.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                self.notifier.notify(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Make `source` canonical and subscribe to it. Returns its generation;
    /// starting it is left to the caller once the gate is released.
    async fn attach_locked(
        self: &Arc<Self>,
        canonical: &mut Canonical,
        source: Arc<dyn FrameSource>,
    ) -> Result<u64, AppError> {
        if canonical.shut_down {
            source.dispose().await;
            return Err(PipelineError::ShutDown.into());
        }
        self.teardown_source(canonical).await;

        if canonical.engine.is_none() {
            match self.factory.create(None).await {
                Ok(engine) => canonical.engine = Some(engine),
                Err(e) => {
                    self.notifier.notify(&e.to_string());
                    source.dispose().await;
                    return Err(e.into());
                }
            }
        }

        canonical.generation += 1;
        let generation = canonical.generation;
        self.generation.store(generation, Ordering::Release);
        self.subscribe(source.as_ref(), generation);

        if let Err(e) = self
            .display
            .begin_source(generation, source.frame_dimensions(), source.is_static())
            .await
        {
            warn!("Display did not accept new source: {}", e);
        }

        canonical.source = Some(source);
        Ok(generation)
    }

    async fn start_attached(
        &self,
        source: Arc<dyn FrameSource>,
        generation: u64,
    ) -> Result<(), AppError> {
        let Err(e) = source.start().await else {
            info!(
                "Attached {:?} source {} (generation {})",
                source.kind(),
                source.description(),
                generation
            );
            return Ok(());
        };

        let mut canonical = self.gate.acquire_blocking().await;
        if canonical.generation != generation || canonical.source.is_none() {
            debug!("{} was replaced before it started: {}", source.description(), e);
            return Ok(());
        }
        error!("Failed to start {}: {}", source.description(), e);
        self.teardown_source(&mut canonical).await;
        self.settle(&canonical);
        canonical.release();
        self.notifier.notify(&e.to_string());
        Err(e.into())
    }

    async fn switch_device_locked(
        &self,
        canonical: &mut Canonical,
        device: ExecutionDeviceDescriptor,
    ) -> Result<(), AppError> {
        if canonical.shut_down {
            return Err(PipelineError::ShutDown.into());
        }
        if let Some(source) = &canonical.source {
            source.stop().await;
        }

        let rebuilt = self.factory.create(Some(&device)).await;
        let outcome = match rebuilt {
            Ok(engine) => {
                info!("Analysis engine moved to {}", engine.device());
                canonical.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                warn!("Could not switch to {}: {}", device, e);
                self.release_lost_engine(canonical).await;
                self.notifier.notify(&e.to_string());
                Err(e)
            }
        };

        if canonical.engine.is_none() {
            self.teardown_source(canonical).await;
        } else if let Some(source) = canonical.source.clone() {
            if let Err(e) = source.start().await {
                error!("Failed to restart {}: {}", source.description(), e);
                self.teardown_source(canonical).await;
                self.notifier.notify(&e.to_string());
                return Err(e.into());
            }
        }
        outcome.map_err(AppError::from)
    }

    /// Drop the current engine if its device disappeared from the enumeration.
    async fn release_lost_engine(&self, canonical: &mut Canonical) {
        canonical.devices = self.factory.list_execution_devices().await;
        let lost = canonical.engine.as_ref().is_some_and(|engine| {
            device::position_of(&canonical.devices, engine.device()).is_none()
        });
        if lost {
            warn!("Current execution device is gone as well, no engine left");
            canonical.engine = None;
        }
    }

    async fn teardown_source(&self, canonical: &mut Canonical) {
        let Some(source) = canonical.source.take() else {
            return;
        };
        unsubscribe(source.as_ref());
        source.stop().await;
        source.dispose().await;
        if let Err(e) = self.display.end_source(canonical.generation).await {
            warn!("Display did not accept source teardown: {}", e);
        }
        info!("Detached source {}", source.description());
    }

    fn subscribe(self: &Arc<Self>, source: &dyn FrameSource, generation: u64) {
        let weak = Arc::downgrade(self);
        source.events().subscribe_frames(Arc::new(move |frame: Frame| {
            if let Some(shared) = weak.upgrade() {
                Shared::frame_arrived(&shared, generation, frame);
            }
        }));

        let weak = Arc::downgrade(self);
        source.events().subscribe_failures(Arc::new(move |error: SourceError| {
            if let Some(shared) = weak.upgrade() {
                let failing = Arc::clone(&shared);
                shared
                    .runtime
                    .spawn(async move { failing.source_failed(generation, error).await });
            }
        }));
    }

    fn frame_arrived(self: &Arc<Self>, generation: u64, frame: Frame) {
        self.metrics.notify_frame_received();
        if !self.state.borrow().accepts_frames()
            || generation != self.generation.load(Ordering::Acquire)
        {
            debug!("Ignoring frame {} while not running", frame.frame_id());
            return;
        }

        let Some(permit) = self.gate.try_acquire() else {
            self.metrics.notify_frame_dropped();
            debug!("Dropping frame {}: analysis busy", frame.frame_id());
            return;
        };

        let shared = Arc::clone(self);
        self.runtime
            .spawn(async move { shared.run_pass(permit, generation, frame).await });
    }

    #[instrument(skip_all, fields(frame_id = %frame.frame_id(), generation = generation))]
    async fn run_pass(
        &self,
        mut canonical: GatePermit<Canonical>,
        generation: u64,
        frame: Frame,
    ) {
        // a reconfiguration may have announced itself after the frame was admitted
        if !self.state.borrow().accepts_frames() || canonical.generation != generation {
            debug!("Frame arrived for a retired configuration");
            return;
        }
        let Some(engine) = canonical.engine.as_mut() else {
            return;
        };

        let pass = AssertUnwindSafe(analyze(&mut **engine, &frame))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(EngineError::Panicked(panic_message(panic.as_ref()))));

        match pass {
            Ok((bodies, latency)) => {
                self.metrics.notify_pass_completed(&latency);
                let result = AnalysisResult {
                    sequence: self.sequence.fetch_add(1, Ordering::AcqRel) + 1,
                    frame_id: frame.frame_id(),
                    bodies,
                    latency,
                };
                debug!("{}", result.summary());
                match self.display.present(generation, frame, result).await {
                    PresentOutcome::Rendered => {}
                    PresentOutcome::Stale => warn!("Display already shows a newer result"),
                    PresentOutcome::Cancelled => debug!("Result discarded by the display"),
                }
            }
            Err(e) => {
                self.metrics.notify_pass_failed(&e);
                error!("Analysis pass failed: {}", e);
                self.notifier.notify(&e.to_string());
            }
        }
        canonical.release();
    }

    async fn source_failed(&self, generation: u64, failure: SourceError) {
        let mut canonical = self.gate.acquire_blocking().await;
        if canonical.generation != generation || canonical.source.is_none() {
            debug!("Ignoring failure of retired source: {}", failure);
            return;
        }
        warn!("Frame source failed: {}", failure);
        self.teardown_source(&mut canonical).await;
        self.settle(&canonical);
        canonical.release();
        self.notifier.notify(&failure.to_string());
    }
}

fn unsubscribe(source: &dyn FrameSource) {
    source.events().unsubscribe_frames();
    source.events().unsubscribe_failures();
}

async fn analyze(
    engine: &mut dyn AnalysisEngine,
    frame: &Frame,
) -> Result<(Vec<SkeletalBody>, PassLatency), EngineError> {
    let started = Instant::now();
    engine.bind(frame).await?;
    let bind = started.elapsed();

    let started = Instant::now();
    let bodies = engine.evaluate().await?;
    let evaluate = started.elapsed();

    Ok((bodies, PassLatency { bind, evaluate }))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
