//! Error types for the filter engine.

use thiserror::Error;

/// Failures reported by a compute backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("No compatible compute device found: {0}")]
    NoCompatibleDevice(String),

    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Texture {width}x{height} exceeds device limit {limit}")]
    TextureTooLarge { width: u32, height: u32, limit: u32 },

    #[error("Destination texture does not match source: {0}")]
    TextureMismatch(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Pipeline compilation failed: {0}")]
    Compilation(String),

    #[error("Texture readback failed: {0}")]
    Readback(String),

    #[error("Device rejected command: {0}")]
    Rejected(String),
}

/// Failures while loading a WGSL program library.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Failed to read library {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("WGSL parse error in {label}:\n{message}")]
    Parse { label: String, message: String },

    #[error("WGSL validation error in {label}:\n{message}")]
    Validation { label: String, message: String },

    #[error("Unsupported binding @group({group}) @binding({binding}) `{name}` in {label}")]
    UnsupportedBinding {
        label: String,
        name: String,
        group: u32,
        binding: u32,
    },

    #[error("Library {label} declares no compute entry points")]
    NoKernels { label: String },
}

/// Engine construction failures. Construction is all-or-nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Kernel not found: {kernel_id}")]
    KernelNotFound { kernel_id: String },

    #[error("Failed to compile pipeline for {kernel_id}: {cause}")]
    PipelineCompilationFailed { kernel_id: String, cause: String },
}

/// A single dispatch that did not reach the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Invalid filter index {index} (pipeline count {count})")]
    InvalidIndex { index: usize, count: usize },

    #[error("Dispatch for filter {index} abandoned: {source}")]
    Abandoned {
        index: usize,
        #[source]
        source: BackendError,
    },
}

/// Failures that abort a whole run before any effect is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("No source image supplied")]
    NoSourceImage,

    #[error("Failed to decode source image: {0}")]
    DecodeFailed(#[source] BackendError),
}

/// Why a single configured effect produced no result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectFailure {
    #[error("run aborted: {0}")]
    RunAborted(#[source] RunError),

    #[error("texture allocation failed: {0}")]
    Allocation(#[source] BackendError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("encode failed: {0}")]
    Encode(#[source] BackendError),
}
