//! WGSL kernel library.
//!
//! Modules are parsed and validated with naga when loaded. Every `@compute`
//! entry point becomes a kernel id that effects can name.

use crate::error::LibraryError;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{ImageClass, ImageDimension, ScalarKind, ShaderStage, StorageFormat, TypeInner};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Source of the built-in kernels.
pub const BUILTIN_LIBRARY: &str = include_str!("filters.wgsl");

const BUILTIN_LABEL: &str = "builtin filters";

#[derive(Debug)]
struct LibraryModule {
    label: String,
    source: String,
}

/// A resolved kernel: one compute entry point of a validated module.
#[derive(Debug, Clone)]
pub struct KernelProgram {
    kernel_id: String,
    workgroup_size: [u32; 3],
    module: Arc<LibraryModule>,
}

impl KernelProgram {
    /// Entry point name.
    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    /// Work-group size declared by the entry point.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    /// Label of the module the kernel lives in.
    pub fn module_label(&self) -> &str {
        &self.module.label
    }

    /// WGSL source of that module.
    pub fn source(&self) -> &str {
        &self.module.source
    }
}

#[derive(Debug)]
struct ParsedModule {
    module: Arc<LibraryModule>,
    kernels: BTreeMap<String, [u32; 3]>,
}

/// Ordered set of validated WGSL modules.
///
/// When two modules export the same kernel id, the one added last wins.
#[derive(Debug, Default)]
pub struct ProgramLibrary {
    modules: Vec<ParsedModule>,
}

impl ProgramLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Library holding only the built-in filter kernels.
    pub fn builtin() -> Result<Self, LibraryError> {
        Self::from_wgsl(BUILTIN_LABEL, BUILTIN_LIBRARY)
    }

    pub fn from_wgsl(label: impl Into<String>, source: impl Into<String>) -> Result<Self, LibraryError> {
        let mut library = Self::empty();
        library.add_wgsl(label, source)?;
        Ok(library)
    }

    /// Parse, validate and append a WGSL module.
    pub fn add_wgsl(&mut self, label: impl Into<String>, source: impl Into<String>) -> Result<(), LibraryError> {
        let label = label.into();
        let source = source.into();
        let kernels = reflect_kernels(&label, &source)?;
        info!("Loaded kernel library {} ({} kernels)", label, kernels.len());
        debug!("Kernels in {}: {:?}", label, kernels.keys().collect::<Vec<_>>());

        self.modules.push(ParsedModule {
            module: Arc::new(LibraryModule { label, source }),
            kernels,
        });
        Ok(())
    }

    /// Read a WGSL file and append it.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<(), LibraryError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| LibraryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.add_wgsl(path.display().to_string(), source)
    }

    /// Look up a kernel by id.
    pub fn resolve(&self, kernel_id: &str) -> Option<KernelProgram> {
        self.modules.iter().rev().find_map(|parsed| {
            parsed.kernels.get(kernel_id).map(|&workgroup_size| KernelProgram {
                kernel_id: kernel_id.to_string(),
                workgroup_size,
                module: parsed.module.clone(),
            })
        })
    }

    /// Every resolvable kernel id, sorted and deduplicated.
    pub fn kernel_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .modules
            .iter()
            .flat_map(|parsed| parsed.kernels.keys().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Validate a module and collect its compute entry points.
fn reflect_kernels(label: &str, source: &str) -> Result<BTreeMap<String, [u32; 3]>, LibraryError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| LibraryError::Parse {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;

    // No optional device features are requested, so kernels may not rely on any.
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::empty());
    validator.validate(&module).map_err(|e| LibraryError::Validation {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;

    // Kernels share one layout: sampled input at 0, rgba8unorm storage output at 1.
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let inner = &module.types[var.ty].inner;
        let supported = match (binding.group, binding.binding) {
            (0, 0) => matches!(
                inner,
                TypeInner::Image {
                    dim: ImageDimension::D2,
                    arrayed: false,
                    class: ImageClass::Sampled { kind: ScalarKind::Float, multi: false },
                }
            ),
            (0, 1) => matches!(
                inner,
                TypeInner::Image {
                    dim: ImageDimension::D2,
                    arrayed: false,
                    class: ImageClass::Storage { format: StorageFormat::Rgba8Unorm, .. },
                }
            ),
            _ => false,
        };
        if !supported {
            return Err(LibraryError::UnsupportedBinding {
                label: label.to_string(),
                name: var.name.clone().unwrap_or_default(),
                group: binding.group,
                binding: binding.binding,
            });
        }
    }

    let kernels: BTreeMap<String, [u32; 3]> = module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == ShaderStage::Compute)
        .map(|ep| (ep.name.clone(), ep.workgroup_size))
        .collect();

    if kernels.is_empty() {
        return Err(LibraryError::NoKernels { label: label.to_string() });
    }
    Ok(kernels)
}
