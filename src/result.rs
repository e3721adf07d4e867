//! Output of one successful effect.

use image::DynamicImage;

/// An image produced by one effect, paired with that effect's display name.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredResult {
    pub image: DynamicImage,
    pub filter_name: String,
}

impl FilteredResult {
    pub fn new(image: DynamicImage, filter_name: impl Into<String>) -> Self {
        Self {
            image,
            filter_name: filter_name.into(),
        }
    }
}
