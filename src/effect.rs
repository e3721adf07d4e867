//! Effect descriptors: which kernel runs, and what it is called.

use serde::Deserialize;

/// Built-in effects shipped with the default kernel library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Sepia,
    Gold,
    Vignette,
    Grayscale,
    Invert,
}

impl Effect {
    /// All built-in effects in their default presentation order.
    pub const ALL: [Effect; 5] = [
        Effect::Sepia,
        Effect::Gold,
        Effect::Vignette,
        Effect::Grayscale,
        Effect::Invert,
    ];

    /// Name of the compute entry point implementing this effect.
    pub fn kernel_id(self) -> &'static str {
        match self {
            Effect::Sepia => "sepia_filter",
            Effect::Gold => "gold_filter",
            Effect::Vignette => "vignette_filter",
            Effect::Grayscale => "grayscale_filter",
            Effect::Invert => "invert_filter",
        }
    }

    pub fn default_display_name(self) -> &'static str {
        match self {
            Effect::Sepia => "Sepia",
            Effect::Gold => "Gold",
            Effect::Vignette => "Vignette",
            Effect::Grayscale => "Gray",
            Effect::Invert => "Invert",
        }
    }

    /// Descriptor with the default display name.
    pub fn descriptor(self) -> EffectDescriptor {
        EffectDescriptor::new(self.kernel_id(), self.default_display_name())
    }

    /// Descriptor with a custom display name.
    pub fn named(self, display_name: impl Into<String>) -> EffectDescriptor {
        EffectDescriptor::new(self.kernel_id(), display_name)
    }
}

/// Identifies one configured filter.
///
/// The kernel id is fixed at construction; only the display name can change.
/// Nothing deduplicates descriptors, so the same kernel may appear twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    kernel_id: String,
    display_name: String,
}

impl EffectDescriptor {
    pub fn new(kernel_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    /// True if both descriptors name the same kernel, regardless of display name.
    pub fn same_kernel(&self, other: &EffectDescriptor) -> bool {
        self.kernel_id == other.kernel_id
    }
}

impl From<Effect> for EffectDescriptor {
    fn from(effect: Effect) -> Self {
        effect.descriptor()
    }
}

/// The default effect list: every built-in effect with its default name.
pub fn default_effects() -> Vec<EffectDescriptor> {
    Effect::ALL.iter().map(|e| e.descriptor()).collect()
}
