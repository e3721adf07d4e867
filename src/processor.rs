//! Compiled pipelines for a fixed, ordered effect list.

use crate::effect::EffectDescriptor;
use crate::error::{BuildError, DispatchError};
use crate::shader::{ComputeBackend, DispatchGrid, ProgramLibrary, WORKGROUP_TILE};
use std::sync::Arc;
use tracing::{debug, info};

struct CompiledPipeline<P> {
    kernel_id: String,
    pipeline: P,
}

/// One compiled pipeline per configured effect, at the effect's index.
///
/// Built all-or-nothing and immutable afterwards, so it can be shared
/// between threads.
pub struct FilterProcessor<B: ComputeBackend> {
    backend: Arc<B>,
    pipelines: Vec<CompiledPipeline<B::Pipeline>>,
}

impl<B: ComputeBackend> FilterProcessor<B> {
    /// Resolve and compile every descriptor in order.
    ///
    /// The first missing or failing kernel aborts the build; nothing compiled
    /// before it is kept.
    pub fn build(backend: Arc<B>, library: &ProgramLibrary, effects: &[EffectDescriptor]) -> Result<Self, BuildError> {
        let pipelines = effects
            .iter()
            .map(|effect| {
                let kernel_id = effect.kernel_id();
                let program = library.resolve(kernel_id).ok_or_else(|| BuildError::KernelNotFound {
                    kernel_id: kernel_id.to_string(),
                })?;

                if program.workgroup_size() != WORKGROUP_TILE {
                    return Err(BuildError::PipelineCompilationFailed {
                        kernel_id: kernel_id.to_string(),
                        cause: format!(
                            "work-group size {:?} does not match the {:?} tile",
                            program.workgroup_size(),
                            WORKGROUP_TILE
                        ),
                    });
                }

                let pipeline = backend
                    .compile_pipeline(&program)
                    .map_err(|e| BuildError::PipelineCompilationFailed {
                        kernel_id: kernel_id.to_string(),
                        cause: e.to_string(),
                    })?;
                debug!("Compiled pipeline for {}", kernel_id);

                Ok(CompiledPipeline {
                    kernel_id: kernel_id.to_string(),
                    pipeline,
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        info!("Compiled {} filter pipelines", pipelines.len());
        Ok(Self { backend, pipelines })
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Kernel compiled at `index`.
    pub fn kernel_id(&self, index: usize) -> Option<&str> {
        self.pipelines.get(index).map(|p| p.kernel_id.as_str())
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Submit pipeline `index` over `source`, writing `destination`.
    ///
    /// `destination` must have the size and format of `source`. On error nothing
    /// was submitted and `destination` holds no valid content.
    pub fn dispatch(&self, index: usize, source: &B::Texture, destination: &B::Texture) -> Result<DispatchGrid, DispatchError> {
        let compiled = self.pipelines.get(index).ok_or(DispatchError::InvalidIndex {
            index,
            count: self.pipelines.len(),
        })?;

        let (width, height) = self.backend.texture_extent(source);
        let grid = DispatchGrid::for_extent(width, height);
        self.backend
            .dispatch(&compiled.pipeline, source, destination, grid)
            .map_err(|e| DispatchError::Abandoned { index, source: e })?;

        debug!(
            "Dispatched {} over {}x{} ({}x{} work-groups)",
            compiled.kernel_id, width, height, grid.x, grid.y
        );
        Ok(grid)
    }
}
