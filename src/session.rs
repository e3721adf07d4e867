//! Caller-side state around a [`FilterManager`]: the original image, the last
//! delivered results and a user-facing error message.

use crate::manager::FilterManager;
use crate::result::FilteredResult;
use crate::shader::ComputeBackend;
use image::DynamicImage;
use std::sync::mpsc::{Receiver, TryRecvError};
use tracing::warn;

pub const NO_ORIGINAL_MESSAGE: &str = "No original image to filter.";
pub const RUN_LOST_MESSAGE: &str = "Filter run ended without delivering results.";

pub struct FilterSession<B: ComputeBackend> {
    manager: FilterManager<B>,
    original: Option<DynamicImage>,
    filtered: Vec<FilteredResult>,
    error_message: Option<String>,
    pending: Option<Receiver<Vec<FilteredResult>>>,
}

impl<B: ComputeBackend> FilterSession<B> {
    pub fn new(manager: FilterManager<B>) -> Self {
        Self {
            manager,
            original: None,
            filtered: Vec::new(),
            error_message: None,
            pending: None,
        }
    }

    pub fn manager(&self) -> &FilterManager<B> {
        &self.manager
    }

    pub fn set_original(&mut self, image: DynamicImage) {
        self.original = Some(image);
        self.error_message = None;
    }

    pub fn original(&self) -> Option<&DynamicImage> {
        self.original.as_ref()
    }

    /// Results from the last completed run.
    pub fn filtered(&self) -> &[FilteredResult] {
        &self.filtered
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a run over the original image. Without an original the error
    /// message is set and the run still completes, with no results.
    pub fn apply_filters(&mut self) {
        if self.original.is_none() {
            warn!("apply_filters called without an original image");
            self.error_message = Some(NO_ORIGINAL_MESSAGE.to_string());
        } else {
            self.error_message = None;
        }
        self.pending = Some(self.manager.submit(self.original.clone()));
    }

    /// Take the results of the pending run if it has finished. Returns true
    /// once the run is over, including a run that was lost.
    pub fn poll(&mut self) -> bool {
        let Some(receiver) = &self.pending else {
            return false;
        };
        match receiver.try_recv() {
            Ok(results) => {
                self.filtered = results;
                self.pending = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.run_lost();
                true
            }
        }
    }

    fn run_lost(&mut self) {
        warn!("{}", RUN_LOST_MESSAGE);
        self.pending = None;
        self.filtered.clear();
        self.error_message = Some(RUN_LOST_MESSAGE.to_string());
    }

    /// Block until the pending run finishes and return its results.
    pub fn wait(&mut self) -> &[FilteredResult] {
        if let Some(receiver) = self.pending.take() {
            match receiver.recv() {
                Ok(results) => self.filtered = results,
                Err(_) => self.run_lost(),
            }
        }
        &self.filtered
    }

    /// Make the result at `index` the new original.
    pub fn select(&mut self, index: usize) -> bool {
        match self.filtered.get(index) {
            Some(result) => {
                self.original = Some(result.image.clone());
                true
            }
            None => false,
        }
    }
}
