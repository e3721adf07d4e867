//! Filterkit: GPU compute image filters.
//!
//! Runs an ordered list of effects (sepia, gold, vignette, grayscale, invert, or
//! any kernel from an extra WGSL library) over one source image and returns one
//! filtered copy per effect that succeeded.

pub mod config;
pub mod effect;
pub mod error;
pub mod manager;
pub mod processor;
pub mod result;
pub mod session;
pub mod shader;

pub use config::{Config, ConfigError};
pub use effect::{default_effects, Effect, EffectDescriptor};
pub use error::{BackendError, BuildError, DispatchError, EffectFailure, LibraryError, RunError};
pub use manager::{EffectOutcome, EffectReport, FilterManager, RunReport, RunState};
pub use processor::FilterProcessor;
pub use result::FilteredResult;
pub use session::FilterSession;
pub use shader::{ComputeBackend, GpuContext, ProgramLibrary, WgpuBackend};
