//! Runs every configured effect over one source image.
//!
//! A run moves through `Decoding`, one `Dispatching(i)` step per effect,
//! `Collecting` and `Completed`. Effects that fail are left out of the result
//! list; a missing or undecodable source yields an empty list.

use crate::effect::EffectDescriptor;
use crate::error::{BuildError, EffectFailure, RunError};
use crate::processor::FilterProcessor;
use crate::result::FilteredResult;
use crate::shader::{ComputeBackend, ProgramLibrary};
use image::{DynamicImage, RgbaImage};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where the current or last run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Decoding,
    Dispatching(usize),
    Collecting,
    Completed,
}

/// What happened to one configured effect during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome {
    Produced,
    Omitted(EffectFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectReport {
    pub index: usize,
    pub kernel_id: String,
    pub display_name: String,
    pub outcome: EffectOutcome,
}

/// Results of a run plus one report per configured effect.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub results: Vec<FilteredResult>,
    pub effects: Vec<EffectReport>,
}

impl RunReport {
    fn aborted(effects: &[EffectDescriptor], error: RunError) -> Self {
        Self {
            results: Vec::new(),
            effects: effects
                .iter()
                .enumerate()
                .map(|(index, effect)| EffectReport {
                    index,
                    kernel_id: effect.kernel_id().to_string(),
                    display_name: effect.display_name().to_string(),
                    outcome: EffectOutcome::Omitted(EffectFailure::RunAborted(error.clone())),
                })
                .collect(),
        }
    }

    /// Indices of effects that produced no result.
    pub fn omitted(&self) -> Vec<usize> {
        self.effects
            .iter()
            .filter(|report| report.outcome != EffectOutcome::Produced)
            .map(|report| report.index)
            .collect()
    }
}

struct ManagerInner<B: ComputeBackend> {
    processor: FilterProcessor<B>,
    effects: RwLock<Vec<EffectDescriptor>>,
    // Serializes runs; overlapping invocations queue behind each other.
    run_lock: Mutex<()>,
    state: Mutex<RunState>,
}

/// Applies a fixed, ordered list of effects to images.
///
/// Cloning is cheap; clones share pipelines and configuration.
pub struct FilterManager<B: ComputeBackend> {
    inner: Arc<ManagerInner<B>>,
}

impl<B: ComputeBackend> Clone for FilterManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: ComputeBackend> FilterManager<B> {
    /// Compile one pipeline per effect. Fails as a whole if any effect fails.
    pub fn configure(backend: Arc<B>, library: &ProgramLibrary, effects: Vec<EffectDescriptor>) -> Result<Self, BuildError> {
        let processor = FilterProcessor::build(backend, library, &effects)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                processor,
                effects: RwLock::new(effects),
                run_lock: Mutex::new(()),
                state: Mutex::new(RunState::Idle),
            }),
        })
    }

    /// Snapshot of the configured effects, in order.
    pub fn effects(&self) -> Vec<EffectDescriptor> {
        self.inner.effects.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Rename the effect at `index`. Runs already in progress keep the old name.
    pub fn rename(&self, index: usize, display_name: impl Into<String>) -> bool {
        let mut effects = self.inner.effects.write().unwrap_or_else(PoisonError::into_inner);
        match effects.get_mut(index) {
            Some(effect) => {
                effect.rename(display_name);
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Run on a worker thread and hand the results to `on_complete` there, once.
    /// A run that panics completes with an empty list.
    pub fn run<F>(&self, image: Option<DynamicImage>, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(Vec<FilteredResult>) + Send + 'static,
    {
        let manager = self.clone();
        thread::spawn(move || {
            let results = panic::catch_unwind(AssertUnwindSafe(|| manager.apply(image.as_ref()))).unwrap_or_else(|_| {
                error!("Filter run panicked, delivering no results");
                manager.set_state(RunState::Completed);
                Vec::new()
            });
            on_complete(results);
        })
    }

    /// Run on a worker thread; the results arrive on the returned channel so the
    /// caller can receive them on whichever thread it chooses.
    pub fn submit(&self, image: Option<DynamicImage>) -> mpsc::Receiver<Vec<FilteredResult>> {
        let (sender, receiver) = mpsc::channel();
        self.run(image, move |results| {
            let _ = sender.send(results);
        });
        receiver
    }

    /// Run synchronously on the calling thread.
    pub fn apply(&self, image: Option<&DynamicImage>) -> Vec<FilteredResult> {
        self.apply_detailed(image).results
    }

    /// Run synchronously and report the outcome of every effect.
    pub fn apply_detailed(&self, image: Option<&DynamicImage>) -> RunReport {
        let _run = self.inner.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let effects = self.effects();
        let start = Instant::now();

        self.set_state(RunState::Decoding);
        let source = match self.decode(image) {
            Ok(source) => source,
            Err(e) => {
                warn!("Filter run aborted: {}", e);
                self.set_state(RunState::Completed);
                return RunReport::aborted(&effects, e);
            }
        };
        let (width, height) = self.inner.processor.backend().texture_extent(&source);
        debug!("  [Perf] Decode {}x{}: {:?}", width, height, start.elapsed());
        info!("Applying {} filters to {}x{} image", effects.len(), width, height);

        let mut results = Vec::with_capacity(effects.len());
        let mut reports = Vec::with_capacity(effects.len());
        for (index, effect) in effects.iter().enumerate() {
            self.set_state(RunState::Dispatching(index));
            let effect_start = Instant::now();

            let outcome = match self.run_effect(index, &source) {
                Ok(image) => {
                    results.push(FilteredResult::new(DynamicImage::ImageRgba8(image), effect.display_name()));
                    EffectOutcome::Produced
                }
                Err(failure) => {
                    warn!("Skipping filter {} ({}): {}", index, effect.kernel_id(), failure);
                    EffectOutcome::Omitted(failure)
                }
            };
            debug!("  [Perf] {}: {:?}", effect.kernel_id(), effect_start.elapsed());

            reports.push(EffectReport {
                index,
                kernel_id: effect.kernel_id().to_string(),
                display_name: effect.display_name().to_string(),
                outcome,
            });
        }

        self.set_state(RunState::Collecting);
        info!("Produced {} of {} filtered images", results.len(), effects.len());
        debug!("  [Perf] TOTAL RUN: {:?}", start.elapsed());
        self.set_state(RunState::Completed);

        RunReport {
            results,
            effects: reports,
        }
    }

    fn decode(&self, image: Option<&DynamicImage>) -> Result<B::Texture, RunError> {
        let image = image.ok_or(RunError::NoSourceImage)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(RunError::NoSourceImage);
        }
        self.inner
            .processor
            .backend()
            .decode_to_texture(image)
            .map_err(RunError::DecodeFailed)
    }

    /// Allocate, dispatch and read back one effect. The destination texture is
    /// dropped as soon as its pixels are copied out.
    fn run_effect(&self, index: usize, source: &B::Texture) -> Result<RgbaImage, EffectFailure> {
        let backend = self.inner.processor.backend();
        let destination = backend.allocate_like(source).map_err(EffectFailure::Allocation)?;
        self.inner.processor.dispatch(index, source, &destination)?;
        backend.encode_from_texture(&destination).map_err(EffectFailure::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{default_effects, Effect};
    use crate::error::{BackendError, DispatchError};
    use crate::shader::mock::{marker_pixel, MockBackend};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn library() -> ProgramLibrary {
        ProgramLibrary::builtin().unwrap()
    }

    fn image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
    }

    fn manager(backend: MockBackend, effects: Vec<EffectDescriptor>) -> (Arc<MockBackend>, FilterManager<MockBackend>) {
        let backend = Arc::new(backend);
        let manager = FilterManager::configure(backend.clone(), &library(), effects).unwrap();
        (backend, manager)
    }

    fn names(results: &[FilteredResult]) -> Vec<&str> {
        results.iter().map(|r| r.filter_name.as_str()).collect()
    }

    #[test]
    fn test_sepia_and_invert() {
        let (_, manager) = manager(
            MockBackend::new(),
            vec![Effect::Sepia.descriptor(), Effect::Invert.descriptor()],
        );
        let results = manager.apply(Some(&image(100, 100)));

        assert_eq!(names(&results), ["Sepia", "Invert"]);
        let sepia = results[0].image.to_rgba8();
        assert_eq!(sepia.dimensions(), (100, 100));
        assert_eq!(sepia.get_pixel(50, 50), &marker_pixel("sepia_filter"));
        assert_eq!(results[1].image.to_rgba8().get_pixel(0, 0), &marker_pixel("invert_filter"));
        assert_eq!(manager.state(), RunState::Completed);
    }

    #[test]
    fn test_bad_kernel_prevents_configuration() {
        let result = FilterManager::configure(
            Arc::new(MockBackend::new()),
            &library(),
            vec![Effect::Sepia.descriptor(), EffectDescriptor::new("BadKernel", "Bad")],
        );
        assert_eq!(
            result.err(),
            Some(BuildError::KernelNotFound {
                kernel_id: "BadKernel".to_string()
            })
        );
    }

    #[test]
    fn test_allocation_failure_omits_only_that_effect() {
        let (_, manager) = manager(MockBackend::failing_allocation(2), default_effects());
        let report = manager.apply_detailed(Some(&image(16, 16)));

        assert_eq!(names(&report.results), ["Sepia", "Gold", "Gray", "Invert"]);
        assert_eq!(report.omitted(), vec![2]);
        assert!(matches!(
            report.effects[2].outcome,
            EffectOutcome::Omitted(EffectFailure::Allocation(BackendError::ResourceExhausted(_)))
        ));
    }

    #[test]
    fn test_order_preserved_across_mixed_failures() {
        let mut mock = MockBackend::new();
        mock.fail_dispatch.insert("gold_filter".to_string());
        mock.fail_encode.insert("grayscale_filter".to_string());
        let (_, manager) = manager(mock, default_effects());

        let report = manager.apply_detailed(Some(&image(8, 8)));
        assert_eq!(names(&report.results), ["Sepia", "Vignette", "Invert"]);
        assert_eq!(report.omitted(), vec![1, 3]);
        assert!(matches!(
            report.effects[1].outcome,
            EffectOutcome::Omitted(EffectFailure::Dispatch(DispatchError::Abandoned { index: 1, .. }))
        ));
        assert!(matches!(report.effects[3].outcome, EffectOutcome::Omitted(EffectFailure::Encode(_))));
    }

    #[test]
    fn test_destinations_never_alias() {
        let (backend, manager) = manager(MockBackend::new(), default_effects());
        manager.apply(Some(&image(32, 24)));

        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 5);
        let source = dispatches[0].source;
        assert!(dispatches.iter().all(|d| d.source == source));

        let destinations: HashSet<u64> = dispatches.iter().map(|d| d.destination).collect();
        assert_eq!(destinations.len(), dispatches.len());
        assert!(!destinations.contains(&source));
    }

    #[test]
    fn test_missing_source_yields_empty_list() {
        let (backend, manager) = manager(MockBackend::new(), default_effects());
        let report = manager.apply_detailed(None);

        assert!(report.results.is_empty());
        assert_eq!(report.omitted(), vec![0, 1, 2, 3, 4]);
        assert!(matches!(
            report.effects[0].outcome,
            EffectOutcome::Omitted(EffectFailure::RunAborted(RunError::NoSourceImage))
        ));
        assert!(backend.dispatches().is_empty());
        assert_eq!(manager.state(), RunState::Completed);
    }

    #[test]
    fn test_empty_image_counts_as_missing() {
        let (_, manager) = manager(MockBackend::new(), default_effects());
        let report = manager.apply_detailed(Some(&image(0, 0)));
        assert!(report.results.is_empty());
        assert!(matches!(
            report.effects[4].outcome,
            EffectOutcome::Omitted(EffectFailure::RunAborted(RunError::NoSourceImage))
        ));
    }

    #[test]
    fn test_decode_failure_yields_empty_list() {
        let (backend, manager) = manager(MockBackend::failing_decode(), default_effects());
        let report = manager.apply_detailed(Some(&image(4, 4)));

        assert!(report.results.is_empty());
        assert!(matches!(
            report.effects[0].outcome,
            EffectOutcome::Omitted(EffectFailure::RunAborted(RunError::DecodeFailed(_)))
        ));
        assert!(backend.dispatches().is_empty());
    }

    #[test]
    fn test_rename_applies_to_next_run() {
        let (_, manager) = manager(MockBackend::new(), vec![Effect::Sepia.descriptor(), Effect::Invert.descriptor()]);
        assert!(manager.rename(1, "Negative"));
        assert!(!manager.rename(2, "Missing"));

        let results = manager.apply(Some(&image(4, 4)));
        assert_eq!(names(&results), ["Sepia", "Negative"]);
        assert_eq!(manager.effects()[1].kernel_id(), "invert_filter");
    }

    #[test]
    fn test_runs_do_not_share_textures() {
        let (backend, manager) = manager(MockBackend::new(), vec![Effect::Invert.descriptor()]);
        manager.apply(Some(&image(4, 4)));
        manager.apply(Some(&image(4, 4)));

        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 2);
        assert_ne!(dispatches[0].source, dispatches[1].source);
        assert_ne!(dispatches[0].destination, dispatches[1].destination);
    }

    #[test]
    fn test_submit_delivers_results_on_channel() {
        let (_, manager) = manager(MockBackend::new(), vec![Effect::Sepia.descriptor(), Effect::Invert.descriptor()]);
        let receiver = manager.submit(Some(image(10, 10)));

        let results = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(names(&results), ["Sepia", "Invert"]);
        // Delivered exactly once; the sender is gone afterwards.
        assert!(receiver.recv().is_err());
    }

    #[test]
    fn test_run_invokes_completion_once() {
        let (_, manager) = manager(MockBackend::new(), default_effects());
        let calls = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let calls = calls.clone();
            let delivered = delivered.clone();
            manager.run(None, move |results| {
                calls.fetch_add(1, Ordering::SeqCst);
                *delivered.lock().unwrap() = results;
            })
        };
        handle.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_runs_are_serialized() {
        let (backend, manager) = manager(MockBackend::new(), default_effects());
        let first = manager.submit(Some(image(8, 8)));
        let second = manager.submit(Some(image(8, 8)));

        assert_eq!(first.recv_timeout(Duration::from_secs(10)).unwrap().len(), 5);
        assert_eq!(second.recv_timeout(Duration::from_secs(10)).unwrap().len(), 5);

        // Each run's five dispatches are contiguous and share one source.
        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 10);
        for run in dispatches.chunks(5) {
            assert!(run.iter().all(|d| d.source == run[0].source));
        }
        assert_ne!(dispatches[0].source, dispatches[5].source);
    }

    #[test]
    fn test_panicking_run_still_delivers_once() {
        // Allocation 2 is the first effect of the second run.
        let (_, manager) = manager(
            MockBackend::panicking_allocation(2),
            vec![Effect::Sepia.descriptor(), Effect::Invert.descriptor()],
        );
        let first = manager.submit(Some(image(4, 4)));
        assert_eq!(first.recv_timeout(Duration::from_secs(10)).unwrap().len(), 2);

        let second = manager.submit(Some(image(4, 4)));
        assert!(second.recv_timeout(Duration::from_secs(10)).unwrap().is_empty());
        assert!(second.recv().is_err());
        assert_eq!(manager.state(), RunState::Completed);

        // The manager stays usable after the panic.
        assert_eq!(names(&manager.apply(Some(&image(4, 4)))), ["Sepia", "Invert"]);
    }
}
