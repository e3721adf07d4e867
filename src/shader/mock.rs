//! Recording backend for tests that need no GPU.

use super::{ComputeBackend, DispatchGrid, KernelProgram};
use crate::error::BackendError;
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Texture whose "pixels" are the kernel that last wrote it.
#[derive(Debug)]
pub struct MockTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    written_by: Mutex<Option<String>>,
}

impl MockTexture {
    pub fn written_by(&self) -> Option<String> {
        self.written_by.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub struct MockPipeline {
    pub kernel_id: String,
}

/// One recorded dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub kernel_id: String,
    pub source: u64,
    pub destination: u64,
    pub grid: DispatchGrid,
}

/// Backend that records every call and fails on demand.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub fail_compile: HashSet<String>,
    /// Zero-based allocation calls that fail.
    pub fail_allocation: HashSet<usize>,
    /// Kernel ids whose dispatch fails.
    pub fail_dispatch: HashSet<String>,
    /// Kernel ids whose output fails to encode.
    pub fail_encode: HashSet<String>,
    pub fail_decode: bool,
    /// Zero-based allocation calls that panic, as a device error handler might.
    pub panic_allocation: HashSet<usize>,
    next_texture: AtomicU64,
    allocations: AtomicUsize,
    compiled: Mutex<Vec<String>>,
    dispatches: Mutex<Vec<DispatchRecord>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_allocation(index: usize) -> Self {
        Self {
            fail_allocation: HashSet::from([index]),
            ..Self::default()
        }
    }

    pub fn failing_decode() -> Self {
        Self {
            fail_decode: true,
            ..Self::default()
        }
    }

    pub fn panicking_allocation(index: usize) -> Self {
        Self {
            panic_allocation: HashSet::from([index]),
            ..Self::default()
        }
    }

    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().unwrap().clone()
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.dispatches.lock().unwrap().clone()
    }

    fn texture(&self, width: u32, height: u32, written_by: Option<String>) -> MockTexture {
        MockTexture {
            id: self.next_texture.fetch_add(1, Ordering::SeqCst),
            width,
            height,
            written_by: Mutex::new(written_by),
        }
    }
}

/// Pixel value a mock encode produces for `kernel_id`, so tests can tell outputs apart.
pub fn marker_pixel(kernel_id: &str) -> Rgba<u8> {
    let sum = kernel_id.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    Rgba([sum, kernel_id.len() as u8, 0, 255])
}

impl ComputeBackend for MockBackend {
    type Texture = MockTexture;
    type Pipeline = MockPipeline;

    fn compile_pipeline(&self, program: &KernelProgram) -> Result<MockPipeline, BackendError> {
        if self.fail_compile.contains(program.kernel_id()) {
            return Err(BackendError::Compilation("forced failure".to_string()));
        }
        self.compiled.lock().unwrap().push(program.kernel_id().to_string());
        Ok(MockPipeline {
            kernel_id: program.kernel_id().to_string(),
        })
    }

    fn allocate_like(&self, source: &MockTexture) -> Result<MockTexture, BackendError> {
        let call = self.allocations.fetch_add(1, Ordering::SeqCst);
        if self.panic_allocation.contains(&call) {
            panic!("forced allocation panic");
        }
        if self.fail_allocation.contains(&call) {
            return Err(BackendError::ResourceExhausted("forced allocation failure".to_string()));
        }
        Ok(self.texture(source.width, source.height, None))
    }

    fn texture_extent(&self, texture: &MockTexture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn dispatch(
        &self,
        pipeline: &MockPipeline,
        source: &MockTexture,
        destination: &MockTexture,
        grid: DispatchGrid,
    ) -> Result<(), BackendError> {
        if self.fail_dispatch.contains(&pipeline.kernel_id) {
            return Err(BackendError::ResourceExhausted("forced dispatch failure".to_string()));
        }
        *destination.written_by.lock().unwrap() = Some(pipeline.kernel_id.clone());
        self.dispatches.lock().unwrap().push(DispatchRecord {
            kernel_id: pipeline.kernel_id.clone(),
            source: source.id,
            destination: destination.id,
            grid,
        });
        Ok(())
    }

    fn decode_to_texture(&self, image: &DynamicImage) -> Result<MockTexture, BackendError> {
        if self.fail_decode {
            return Err(BackendError::InvalidDimensions {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(self.texture(image.width(), image.height(), Some("source".to_string())))
    }

    fn encode_from_texture(&self, texture: &MockTexture) -> Result<RgbaImage, BackendError> {
        let kernel_id = texture
            .written_by()
            .ok_or_else(|| BackendError::Readback("texture never written".to_string()))?;
        if self.fail_encode.contains(&kernel_id) {
            return Err(BackendError::Readback("forced encode failure".to_string()));
        }
        Ok(RgbaImage::from_pixel(texture.width, texture.height, marker_pixel(&kernel_id)))
    }
}
