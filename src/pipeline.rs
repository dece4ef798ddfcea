use hex_capture::{normalize_region, NormalizedRegion, PixelSource};
use hex_data::{ConfigError, DetectorKind, RecognitionConfig, Zone};
use hex_state::{ConsensusResult, SelectionReport};
use hex_vision::{
    ConsensusEngine, CoordinateMap, DetectorBank, DetectorOutcome, DetectorSet, LayoutError,
    ScaleEstimate, ScaleEstimator, UnavailableReason, UpgradeSlot, ZoneLayoutMapper,
};
use image::RgbaImage;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("analysis cancelled before it started")]
    Cancelled,
}

/// Supplies the normalized pixel region for a slot.
///
/// This is the only place the orchestrator suspends.
pub trait RegionSource: Send + Sync + 'static {
    fn extract(&self, slot: &UpgradeSlot) -> impl Future<Output = Option<NormalizedRegion>> + Send;
}

/// Region source backed by an in-memory screenshot
#[derive(Clone)]
pub struct ScreenshotRegionSource {
    frame: Arc<RgbaImage>,
    region_size: u32,
}

impl ScreenshotRegionSource {
    pub fn new(frame: Arc<RgbaImage>, region_size: u32) -> Self {
        Self { frame, region_size }
    }
}

impl RegionSource for ScreenshotRegionSource {
    fn extract(&self, slot: &UpgradeSlot) -> impl Future<Output = Option<NormalizedRegion>> + Send {
        let frame = self.frame.clone();
        let bounds = slot.bounds;
        let size = self.region_size;
        async move {
            tokio::task::spawn_blocking(move || normalize_region(&frame, &bounds, size))
                .await
                .ok()
                .flatten()
        }
    }
}

/// Batch progress, published on a watch channel
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub dropped: usize,
    pub finished: bool,
}

/// Runs scale estimation, slot mapping, detectors and consensus for one
/// screenshot at a time.
pub struct RecognitionOrchestrator {
    config: Arc<RecognitionConfig>,
    estimator: ScaleEstimator,
    mapper: ZoneLayoutMapper,
    detectors: Arc<DetectorBank>,
    engine: Arc<ConsensusEngine>,
    stop: Arc<AtomicBool>,
    progress_tx: watch::Sender<BatchProgress>,
    progress_rx: watch::Receiver<BatchProgress>,
}

impl RecognitionOrchestrator {
    pub fn new(config: RecognitionConfig) -> Result<Self, PipelineError> {
        // the detector bank allocates region-sized masks
        config.validate()?;
        let detectors = DetectorBank::new(config.detectors);
        Self::with_detectors(config, detectors)
    }

    pub fn with_detectors(
        config: RecognitionConfig,
        detectors: DetectorBank,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let engine = ConsensusEngine::from_config(&config)?;
        let (progress_tx, progress_rx) = watch::channel(BatchProgress::default());
        Ok(Self {
            estimator: ScaleEstimator::new(config.layout.clone(), config.scale),
            mapper: ZoneLayoutMapper::new(config.layout.clone()),
            config: Arc::new(config),
            detectors: Arc::new(detectors),
            engine: Arc::new(engine),
            stop: Arc::new(AtomicBool::new(false)),
            progress_tx,
            progress_rx,
        })
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Request cancellation. Slots not yet finished are dropped.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        info!("Recognition stop requested");
    }

    /// Clear a previous stop request so the orchestrator can run again
    pub fn reset(&self) {
        self.stop.store(false, Ordering::Relaxed);
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress_rx.clone()
    }

    pub fn estimate_scale(
        &self,
        width: u32,
        height: u32,
        pixels: Option<&dyn PixelSource>,
    ) -> ScaleEstimate {
        self.estimator.estimate(width, height, pixels)
    }

    /// Scale estimation and slot mapping only
    pub fn map_slots(
        &self,
        width: u32,
        height: u32,
        pixels: Option<&dyn PixelSource>,
    ) -> Result<CoordinateMap, PipelineError> {
        let estimate = self.estimate_scale(width, height, pixels);
        Ok(self.mapper.map(&estimate, width, height)?)
    }

    /// Analyse an in-memory screenshot end to end.
    pub async fn analyze_screenshot(
        &self,
        frame: Arc<RgbaImage>,
    ) -> Result<SelectionReport, PipelineError> {
        let (w, h) = (frame.width(), frame.height());
        let map = self.map_slots(w, h, Some(frame.as_ref()))?;
        let region_size = self.config.detectors.region_size;
        let source = Arc::new(ScreenshotRegionSource::new(frame, region_size));
        self.analyze_map(&map, source).await
    }

    /// Analyse every slot of `map`, pulling regions from `source`.
    pub async fn analyze_map<S: RegionSource>(
        &self,
        map: &CoordinateMap,
        source: Arc<S>,
    ) -> Result<SelectionReport, PipelineError> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }

        let slots = map.slots().to_vec();
        let total = slots.len();
        let batch_size = self.config.batch.batch_size.max(1);
        let timeout = Duration::from_millis(self.config.batch.detector_timeout_ms);
        let _ = self.progress_tx.send(BatchProgress {
            total,
            ..Default::default()
        });

        info!("Analysing {} slot(s) in batches of {}", total, batch_size);

        let mut finished: Vec<(usize, (String, Zone, ConsensusResult))> = Vec::with_capacity(total);
        let mut dropped = 0usize;
        let mut started = 0usize;

        for chunk in slots.chunks(batch_size) {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            let mut tasks = JoinSet::new();
            for slot in chunk.iter().cloned() {
                let index = started;
                started += 1;
                tasks.spawn(analyze_slot(
                    index,
                    slot,
                    source.clone(),
                    self.detectors.clone(),
                    self.engine.clone(),
                    self.stop.clone(),
                    timeout,
                ));
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some(entry)) => finished.push(entry),
                    Ok(None) => dropped += 1,
                    Err(e) => {
                        warn!("Slot task failed: {}", e);
                        dropped += 1;
                    }
                }
                let completed = finished.len();
                self.progress_tx.send_modify(|p| {
                    p.completed = completed;
                    p.dropped = dropped;
                });
            }
        }

        // chunks never started
        dropped += total - started;
        if dropped > 0 {
            warn!("{} slot(s) dropped after cancellation", dropped);
        }

        finished.sort_by_key(|(index, _)| *index);
        let report = SelectionReport::new(
            finished.into_iter().map(|(_, entry)| entry).collect(),
            dropped,
            &self.config.thresholds,
        );
        self.progress_tx.send_modify(|p| {
            p.dropped = dropped;
            p.finished = true;
        });
        report.log_summary();
        Ok(report)
    }
}

async fn analyze_slot<S: RegionSource>(
    index: usize,
    slot: UpgradeSlot,
    source: Arc<S>,
    detectors: Arc<DetectorBank>,
    engine: Arc<ConsensusEngine>,
    stop: Arc<AtomicBool>,
    timeout: Duration,
) -> Option<(usize, (String, Zone, ConsensusResult))> {
    if stop.load(Ordering::Relaxed) {
        return None;
    }

    let set = match source.extract(&slot).await {
        Some(region) => run_detectors(&slot.id, Arc::new(region), detectors, timeout).await,
        None => {
            warn!("No region for slot {}", slot.id);
            DetectorSet::unavailable(UnavailableReason::MissingRegion)
        }
    };

    if stop.load(Ordering::Relaxed) {
        return None;
    }

    let result = engine.fuse(&set);
    debug!(
        "Slot {}: selected={} confidence={:.2} rule={:?}",
        slot.id, result.selected, result.confidence, result.rule
    );
    Some((index, (slot.id, slot.zone, result)))
}

/// Fan the four detectors out on the blocking pool under a shared deadline.
async fn run_detectors(
    slot_id: &str,
    region: Arc<NormalizedRegion>,
    detectors: Arc<DetectorBank>,
    timeout: Duration,
) -> DetectorSet {
    let deadline = Instant::now() + timeout;
    let handles: Vec<_> = DetectorKind::ALL
        .iter()
        .map(|&kind| {
            let detectors = detectors.clone();
            let region = region.clone();
            (kind, tokio::task::spawn_blocking(move || detectors.get(kind).analyze(&region)))
        })
        .collect();

    let mut set = DetectorSet::unavailable(UnavailableReason::TimedOut);
    for (kind, handle) in handles {
        let outcome = match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(result)) => DetectorOutcome::Available(result),
            Ok(Err(e)) => {
                warn!("{} detector crashed on slot {}: {}", kind, slot_id, e);
                DetectorOutcome::Unavailable(UnavailableReason::Crashed)
            }
            Err(_) => {
                warn!(
                    "{} detector timed out on slot {} after {}ms",
                    kind,
                    slot_id,
                    timeout.as_millis()
                );
                DetectorOutcome::Unavailable(UnavailableReason::TimedOut)
            }
        };
        set.set(kind, outcome);
    }
    set
}
