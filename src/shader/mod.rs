//! GPU compute backend and kernel library.

mod gpu_context;
pub(crate) mod library;
#[cfg(test)]
pub(crate) mod mock;
mod wgpu_backend;

pub use gpu_context::GpuContext;
pub use library::{KernelProgram, ProgramLibrary, BUILTIN_LIBRARY};
pub use wgpu_backend::WgpuBackend;

use crate::error::BackendError;
use image::{DynamicImage, RgbaImage};

/// Work-group tile every kernel is compiled for: 8x8x1 invocations.
///
/// Fixed, not tuned per device or texture size.
pub const WORKGROUP_TILE: [u32; 3] = [8, 8, 1];

/// Number of work-groups launched by one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// Grid covering a `width` x `height` texture with [`WORKGROUP_TILE`] tiles.
    /// Partial tiles round up, so a 1x1 texture still gets one work-group.
    pub fn for_extent(width: u32, height: u32) -> Self {
        Self {
            x: width.div_ceil(WORKGROUP_TILE[0]),
            y: height.div_ceil(WORKGROUP_TILE[1]),
            z: 1,
        }
    }
}

/// Device capabilities the filter engine needs.
///
/// Implementations own a device and a single submission queue. Pipelines are
/// immutable once compiled and may be used from several threads; each texture
/// belongs to the run that created it.
pub trait ComputeBackend: Send + Sync + 'static {
    type Texture: Send + Sync;
    type Pipeline: Send + Sync;

    /// Compile a compute pipeline for a resolved kernel.
    fn compile_pipeline(&self, program: &KernelProgram) -> Result<Self::Pipeline, BackendError>;

    /// Allocate a fresh writable texture with the size and format of `source`.
    fn allocate_like(&self, source: &Self::Texture) -> Result<Self::Texture, BackendError>;

    /// Width and height of a texture.
    fn texture_extent(&self, texture: &Self::Texture) -> (u32, u32);

    /// Encode one compute pass reading `source` and writing `destination`, and
    /// submit it. Returns once submitted, not once executed.
    fn dispatch(
        &self,
        pipeline: &Self::Pipeline,
        source: &Self::Texture,
        destination: &Self::Texture,
        grid: DispatchGrid,
    ) -> Result<(), BackendError>;

    /// Upload an image into a new source texture.
    fn decode_to_texture(&self, image: &DynamicImage) -> Result<Self::Texture, BackendError>;

    /// Read a texture back once all submitted work touching it has finished.
    fn encode_from_texture(&self, texture: &Self::Texture) -> Result<RgbaImage, BackendError>;
}
