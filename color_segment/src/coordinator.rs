// THEORY:
// The coordinator is the asynchronous shell around the synchronous pipeline. A
// single actor task, `ColorSegmentService`, owns the configuration store and the
// processing counters; everything else talks to it through a cloneable
// `ColorSegmentHandle` over a bounded command channel, with a oneshot reply per
// request.
//
// Key architectural principles:
// 1.  **One Pass In Flight**: A boolean gate admits at most one processing pass.
//     A request that arrives while a pass is running is dropped and counted; it is
//     never queued.
// 2.  **Snapshot Isolation**: Starting a pass clones the color sets and settings and
//     shares the current lookup table. Configuration edits that arrive mid-pass only
//     affect the next pass.
// 3.  **Guaranteed Completion**: Every pass reports back on a dedicated completion
//     channel, whether it succeeded, failed or panicked. The gate is always
//     released, so the service cannot wedge in the "processing" state.
// 4.  **Pass Identity**: Each pass carries an id. Only the completion of the
//     current pass releases the gate, so a pass orphaned by a stop request cannot
//     clear the gate of a newer one.
// 5.  **Atomic Publication**: Results are swapped into `watch` channels as whole
//     `Arc`s. Readers see either the previous result or the new one.

use crate::config::{ColorSegmentConfig, Settings};
use crate::core_modules::color_definition::ColorDefinition;
use crate::core_modules::color_sampler::{Region, sample_region};
use crate::core_modules::color_set::ColorSet;
use crate::core_modules::frame::Frame;
use crate::error::{SegmentError, SegmentResult};
use crate::pipeline::{
    FoundColorAreas, ProcessingParameters, SegmentationPipeline, SegmentationReport, SegmentedImage,
};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Supplies the most recent camera frame on demand.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn query_frame(&self) -> SegmentResult<Frame>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingState {
    /// A pass is currently in flight.
    pub processing: bool,
    /// Passes started.
    pub frame_count: u64,
    /// Requests refused while busy, plus passes that failed.
    pub dropped_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Started,
    Dropped,
    NoColorSets,
}

/// The service state without the image buffers.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub state: ProcessingState,
    pub settings: Settings,
    pub colors: Vec<ColorSet>,
    pub found_color_areas: Option<FoundColorAreas>,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    ProcessFrame(Reply<ProcessOutcome>),
    StopProcessing(Reply<()>),
    AddColorDefinition(ColorDefinition, Reply<SegmentResult<()>>),
    RemoveColorDefinition(ColorDefinition, Reply<SegmentResult<()>>),
    UpdateColorDefinition(ColorDefinition, Reply<SegmentResult<()>>),
    ExpandLumaTolerance {
        name: String,
        y: i32,
        cb: i32,
        cr: i32,
        reply: Reply<SegmentResult<()>>,
    },
    FindColorSet(String, Reply<SegmentResult<ColorSet>>),
    UpdateSettings(Settings, Reply<()>),
    State(Reply<ProcessingState>),
    Snapshot(Reply<ServiceSnapshot>),
    Config(Reply<ColorSegmentConfig>),
    Shutdown,
}

struct PassCompletion {
    pass_id: u64,
    result: SegmentResult<SegmentationReport>,
}

pub struct ColorSegmentService {
    config: ColorSegmentConfig,
    state: ProcessingState,
    source: Arc<dyn FrameSource>,
    current_pass: u64,
    commands: mpsc::Receiver<Command>,
    completion_sender: mpsc::UnboundedSender<PassCompletion>,
    completion_receiver: mpsc::UnboundedReceiver<PassCompletion>,
    segmented_image: watch::Sender<Option<Arc<SegmentedImage>>>,
    found_color_areas: watch::Sender<Option<Arc<FoundColorAreas>>>,
}

impl ColorSegmentService {
    /// Starts the service task. It runs until `shutdown` is requested or every
    /// handle has been dropped.
    pub fn spawn(
        config: ColorSegmentConfig,
        source: Arc<dyn FrameSource>,
    ) -> (ColorSegmentHandle, JoinHandle<()>) {
        let (command_sender, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        let (segmented_image, segmented_image_receiver) = watch::channel(None);
        let (found_color_areas, found_color_areas_receiver) = watch::channel(None);

        let service = Self {
            config,
            state: ProcessingState::default(),
            source: Arc::clone(&source),
            current_pass: 0,
            commands,
            completion_sender,
            completion_receiver,
            segmented_image,
            found_color_areas,
        };
        let task = tokio::spawn(service.run());

        let handle = ColorSegmentHandle {
            commands: command_sender,
            source,
            segmented_image: segmented_image_receiver,
            found_color_areas: found_color_areas_receiver,
        };
        (handle, task)
    }

    async fn run(mut self) {
        tracing::info!(color_sets = self.config.colors().len(), "color segment service started");

        loop {
            tokio::select! {
                Some(completion) = self.completion_receiver.recv() => {
                    self.on_pass_complete(completion);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
            }
        }

        tracing::info!(
            frame_count = self.state.frame_count,
            dropped_frames = self.state.dropped_frames,
            "color segment service stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply receiver means the caller gave up waiting; nothing to do.
        match command {
            Command::ProcessFrame(reply) => {
                let _ = reply.send(self.request_process_frame());
            }
            Command::StopProcessing(reply) => {
                if self.state.processing {
                    tracing::debug!(pass_id = self.current_pass, "processing stopped");
                }
                self.state.processing = false;
                let _ = reply.send(());
            }
            Command::AddColorDefinition(definition, reply) => {
                let _ = reply.send(self.config.add_color_definition(definition));
            }
            Command::RemoveColorDefinition(definition, reply) => {
                let _ = reply.send(self.config.remove_color_definition(&definition));
            }
            Command::UpdateColorDefinition(definition, reply) => {
                let _ = reply.send(self.config.update_color_definition(definition));
            }
            Command::ExpandLumaTolerance { name, y, cb, cr, reply } => {
                let _ = reply.send(self.config.expand_luma_tolerance(&name, y, cb, cr));
            }
            Command::FindColorSet(name, reply) => {
                let _ = reply.send(self.config.find_color_set(&name).cloned());
            }
            Command::UpdateSettings(settings, reply) => {
                self.config.update_settings(settings);
                let _ = reply.send(());
            }
            Command::State(reply) => {
                let _ = reply.send(self.state);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Config(reply) => {
                let _ = reply.send(self.config.clone());
            }
            Command::Shutdown => {}
        }
    }

    fn request_process_frame(&mut self) -> ProcessOutcome {
        if self.state.processing {
            self.state.dropped_frames += 1;
            tracing::trace!(dropped_frames = self.state.dropped_frames, "frame dropped, pass in flight");
            return ProcessOutcome::Dropped;
        }

        if self.config.colors().is_empty() {
            self.segmented_image.send_replace(None);
            return ProcessOutcome::NoColorSets;
        }

        self.state.processing = true;
        self.state.frame_count += 1;
        self.current_pass += 1;
        self.start_pass(self.current_pass, self.config.snapshot());
        ProcessOutcome::Started
    }

    fn start_pass(&self, pass_id: u64, params: ProcessingParameters) {
        let source = Arc::clone(&self.source);
        let completions = self.completion_sender.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(run_pass(source, params))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SegmentError::PassFailed(panic_message(&*panic))));
            // The service may already have shut down.
            let _ = completions.send(PassCompletion { pass_id, result });
        });
    }

    fn on_pass_complete(&mut self, completion: PassCompletion) {
        let PassCompletion { pass_id, result } = completion;
        if pass_id == self.current_pass {
            self.state.processing = false;
        }

        match result {
            Ok(report) => {
                tracing::trace!(pass_id, areas = report.found_color_areas.areas.len(), "pass complete");
                self.segmented_image.send_replace(Some(Arc::new(report.segmented_image)));
                self.found_color_areas.send_replace(Some(Arc::new(report.found_color_areas)));
            }
            Err(error) => {
                self.state.dropped_frames += 1;
                tracing::warn!(pass_id, %error, "processing pass failed");
            }
        }
    }

    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            state: self.state,
            settings: self.config.settings.clone(),
            colors: self.config.colors().to_vec(),
            found_color_areas: self.found_color_areas.borrow().as_deref().cloned(),
        }
    }
}

async fn run_pass(source: Arc<dyn FrameSource>, params: ProcessingParameters) -> SegmentResult<SegmentationReport> {
    let frame = source.query_frame().await?;
    let pipeline = SegmentationPipeline::new(params);

    tokio::task::spawn_blocking(move || pipeline.generate_report(frame))
        .await
        .map_err(|error| SegmentError::PassFailed(error.to_string()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "pass panicked".to_string()
    }
}

/// Cloneable front end of a running `ColorSegmentService`.
#[derive(Clone)]
pub struct ColorSegmentHandle {
    commands: mpsc::Sender<Command>,
    source: Arc<dyn FrameSource>,
    segmented_image: watch::Receiver<Option<Arc<SegmentedImage>>>,
    found_color_areas: watch::Receiver<Option<Arc<FoundColorAreas>>>,
}

impl ColorSegmentHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SegmentResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SegmentError::ServiceClosed)?;
        response.await.map_err(|_| SegmentError::ServiceClosed)
    }

    /// Asks for a new pass. Returns immediately; the pass itself runs in the background.
    pub async fn request_process_frame(&self) -> SegmentResult<ProcessOutcome> {
        self.request(Command::ProcessFrame).await
    }

    /// Releases the processing gate without waiting for the pass in flight.
    pub async fn request_stop_processing(&self) -> SegmentResult<()> {
        self.request(Command::StopProcessing).await
    }

    pub async fn add_color_definition(&self, definition: ColorDefinition) -> SegmentResult<()> {
        self.request(|reply| Command::AddColorDefinition(definition, reply)).await?
    }

    pub async fn remove_color_definition(&self, definition: ColorDefinition) -> SegmentResult<()> {
        self.request(|reply| Command::RemoveColorDefinition(definition, reply)).await?
    }

    pub async fn update_color_definition(&self, definition: ColorDefinition) -> SegmentResult<()> {
        self.request(|reply| Command::UpdateColorDefinition(definition, reply)).await?
    }

    pub async fn expand_luma_tolerance(&self, name: &str, y: i32, cb: i32, cr: i32) -> SegmentResult<()> {
        let name = name.to_string();
        self.request(|reply| Command::ExpandLumaTolerance { name, y, cb, cr, reply })
            .await?
    }

    pub async fn find_color_set(&self, name: &str) -> SegmentResult<ColorSet> {
        let name = name.to_string();
        self.request(|reply| Command::FindColorSet(name, reply)).await?
    }

    pub async fn update_settings(&self, settings: Settings) -> SegmentResult<()> {
        self.request(|reply| Command::UpdateSettings(settings, reply)).await
    }

    /// Learns a color from `region` of a freshly queried frame and adds it.
    pub async fn sample_color(&self, name: &str, region: Region) -> SegmentResult<ColorDefinition> {
        let frame = self.source.query_frame().await?;
        let definition = sample_region(name, &frame, region)?;
        self.add_color_definition(definition.clone()).await?;
        Ok(definition)
    }

    pub async fn state(&self) -> SegmentResult<ProcessingState> {
        self.request(Command::State).await
    }

    pub async fn snapshot(&self) -> SegmentResult<ServiceSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub async fn config(&self) -> SegmentResult<ColorSegmentConfig> {
        self.request(Command::Config).await
    }

    pub async fn save_config(&self, path: impl AsRef<Path>) -> SegmentResult<()> {
        self.config().await?.save(path)
    }

    pub fn segmented_image(&self) -> Option<Arc<SegmentedImage>> {
        self.segmented_image.borrow().clone()
    }

    pub fn found_color_areas(&self) -> Option<Arc<FoundColorAreas>> {
        self.found_color_areas.borrow().clone()
    }

    pub fn subscribe_segmented_image(&self) -> watch::Receiver<Option<Arc<SegmentedImage>>> {
        self.segmented_image.clone()
    }

    pub fn subscribe_found_color_areas(&self) -> watch::Receiver<Option<Arc<FoundColorAreas>>> {
        self.found_color_areas.clone()
    }

    pub async fn shutdown(&self) -> SegmentResult<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| SegmentError::ServiceClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tokio::sync::Semaphore;

    /// Hands out `frame` only after `release` has been called once per query.
    struct GatedSource {
        frame: Frame,
        gate: Semaphore,
    }

    impl GatedSource {
        fn new(frame: Frame) -> Arc<Self> {
            Arc::new(Self {
                frame,
                gate: Semaphore::new(0),
            })
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl FrameSource for GatedSource {
        async fn query_frame(&self) -> SegmentResult<Frame> {
            self.gate
                .acquire()
                .await
                .map_err(|error| SegmentError::FrameSource(error.to_string()))?
                .forget();
            Ok(self.frame.clone())
        }
    }

    struct StaticSource(Frame);

    #[async_trait]
    impl FrameSource for StaticSource {
        async fn query_frame(&self) -> SegmentResult<Frame> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl FrameSource for FailingSource {
        async fn query_frame(&self) -> SegmentResult<Frame> {
            Err(SegmentError::FrameSource("camera unplugged".into()))
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl FrameSource for PanickingSource {
        async fn query_frame(&self) -> SegmentResult<Frame> {
            panic!("driver crashed")
        }
    }

    fn red_square_frame() -> Frame {
        let mut data = vec![0u8; 4 * 4 * 3];
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let offset = (y * 4 + x) * 3;
            data[offset..offset + 3].copy_from_slice(&[0, 0, 255]);
        }
        Frame::packed(SystemTime::UNIX_EPOCH, 4, 4, data).unwrap()
    }

    fn red() -> ColorDefinition {
        ColorDefinition::from_rgb("Red", 255, 0, 0).with_sigmas(10, 10, 10)
    }

    fn red_config() -> ColorSegmentConfig {
        let mut config = ColorSegmentConfig::new(Settings {
            min_blob_size: 1,
            ..Settings::default()
        });
        config.add_color_definition(red()).unwrap();
        config
    }

    async fn wait_until_idle(handle: &ColorSegmentHandle) -> ProcessingState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = handle.state().await.unwrap();
                if !state.processing {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("service never returned to idle")
    }

    #[tokio::test]
    async fn requests_while_busy_are_dropped() {
        let source = GatedSource::new(red_square_frame());
        let (handle, _task) = ColorSegmentService::spawn(red_config(), source.clone());

        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::Started);
        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::Dropped);
        assert_eq!(
            handle.state().await.unwrap(),
            ProcessingState {
                processing: true,
                frame_count: 1,
                dropped_frames: 1,
            }
        );

        let mut areas = handle.subscribe_found_color_areas();
        source.release();
        areas.wait_for(Option::is_some).await.unwrap();

        let state = wait_until_idle(&handle).await;
        assert_eq!((state.frame_count, state.dropped_frames), (1, 1));
        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::Started);
    }

    #[tokio::test]
    async fn completed_pass_publishes_results() {
        let source = Arc::new(StaticSource(red_square_frame()));
        let (handle, _task) = ColorSegmentService::spawn(red_config(), source);

        let mut images = handle.subscribe_segmented_image();
        handle.request_process_frame().await.unwrap();
        images.wait_for(Option::is_some).await.unwrap();

        let image = handle.segmented_image().unwrap();
        assert_eq!((image.width, image.height), (4, 4));

        wait_until_idle(&handle).await;
        let areas = handle.found_color_areas().unwrap();
        assert_eq!(areas.areas.len(), 1);
        assert_eq!(areas.areas[0].name, "Red");
        assert_eq!(areas.areas[0].area, 4);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.colors.len(), 1);
        assert_eq!(snapshot.found_color_areas.unwrap().areas.len(), 1);
    }

    #[tokio::test]
    async fn failed_frame_query_counts_as_dropped() {
        let (handle, _task) = ColorSegmentService::spawn(red_config(), Arc::new(FailingSource));

        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::Started);
        let state = wait_until_idle(&handle).await;

        assert_eq!((state.frame_count, state.dropped_frames), (1, 1));
        assert!(handle.found_color_areas().is_none());
    }

    #[tokio::test]
    async fn panicking_pass_still_releases_the_gate() {
        let (handle, _task) = ColorSegmentService::spawn(red_config(), Arc::new(PanickingSource));

        handle.request_process_frame().await.unwrap();
        let state = wait_until_idle(&handle).await;

        assert_eq!(state.dropped_frames, 1);
        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::Started);
    }

    #[tokio::test]
    async fn no_color_sets_stays_idle() {
        let source = Arc::new(StaticSource(red_square_frame()));
        let (handle, _task) = ColorSegmentService::spawn(ColorSegmentConfig::default(), source);

        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::NoColorSets);
        assert_eq!(handle.state().await.unwrap(), ProcessingState::default());
        assert!(handle.segmented_image().is_none());
    }

    #[tokio::test]
    async fn stop_releases_gate_and_stale_pass_cannot_clear_new_one() {
        let source = GatedSource::new(red_square_frame());
        let (handle, _task) = ColorSegmentService::spawn(red_config(), source.clone());

        handle.request_process_frame().await.unwrap();
        handle.request_stop_processing().await.unwrap();
        assert!(!handle.state().await.unwrap().processing);

        // Second pass starts while the first is still waiting for its frame.
        assert_eq!(handle.request_process_frame().await.unwrap(), ProcessOutcome::Started);

        let mut areas = handle.subscribe_found_color_areas();
        source.release();
        areas.wait_for(Option::is_some).await.unwrap();
        assert!(handle.state().await.unwrap().processing);

        source.release();
        let state = wait_until_idle(&handle).await;
        assert_eq!((state.frame_count, state.dropped_frames), (2, 0));
    }

    #[tokio::test]
    async fn edits_during_a_pass_do_not_affect_it() {
        let source = GatedSource::new(red_square_frame());
        let (handle, _task) = ColorSegmentService::spawn(red_config(), source.clone());

        handle.request_process_frame().await.unwrap();
        handle.remove_color_definition(red()).await.unwrap();
        assert!(matches!(
            handle.find_color_set("Red").await,
            Err(SegmentError::UnknownColorSet(_))
        ));

        let mut areas = handle.subscribe_found_color_areas();
        source.release();
        let published = areas.wait_for(Option::is_some).await.unwrap().clone().unwrap();
        assert_eq!(published.areas[0].name, "Red");
    }

    #[tokio::test]
    async fn configuration_edits_round_trip_through_the_handle() {
        let source = Arc::new(StaticSource(red_square_frame()));
        let (handle, _task) = ColorSegmentService::spawn(red_config(), source);

        assert!(matches!(
            handle.add_color_definition(red()).await,
            Err(SegmentError::DuplicateColorDefinition(_))
        ));
        handle.expand_luma_tolerance("Red", 81, 90, 240).await.unwrap();
        assert_eq!(handle.find_color_set("Red").await.unwrap().colors[0].sigma_y, 15);

        handle
            .update_settings(Settings {
                despeckle: true,
                ..Settings::default()
            })
            .await
            .unwrap();
        assert!(handle.config().await.unwrap().settings.despeckle);
    }

    #[tokio::test]
    async fn sample_color_adds_a_definition() {
        let frame = Frame::packed(SystemTime::UNIX_EPOCH, 6, 6, [255, 0, 0].repeat(36)).unwrap();
        let (handle, _task) =
            ColorSegmentService::spawn(ColorSegmentConfig::default(), Arc::new(StaticSource(frame)));

        let region = Region { left: 0, top: 0, width: 6, height: 6 };
        let definition = handle.sample_color("Sky", region).await.unwrap();
        assert_eq!((definition.y, definition.cb, definition.cr), (41, 240, 110));

        let set = handle.find_color_set("Sky").await.unwrap();
        assert_eq!(set.colors, vec![definition]);
    }

    #[tokio::test]
    async fn closed_service_reports_errors() {
        let source = Arc::new(StaticSource(red_square_frame()));
        let (handle, task) = ColorSegmentService::spawn(red_config(), source);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.state().await, Err(SegmentError::ServiceClosed)));
    }
}
