//! Hand detection interface.

use std::sync::Arc;

use crate::{image::Frame, landmark::LandmarkSet, timer::Timer};

/// Finds hands in a frame and reports their landmarks.
///
/// Hands are returned in detection order, which the pipeline preserves: the first hand that yields
/// a confident gesture wins. A frame without hands produces an empty list, not an error.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>>;

    /// Returns snapshots of the timers of the detector's stages, if it keeps any.
    fn timers(&self) -> Vec<Timer> {
        Vec::new()
    }
}

impl<D: Detector + ?Sized> Detector for &D {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>> {
        (**self).detect(frame)
    }

    fn timers(&self) -> Vec<Timer> {
        (**self).timers()
    }
}

impl<D: Detector + ?Sized> Detector for Arc<D> {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>> {
        (**self).detect(frame)
    }

    fn timers(&self) -> Vec<Timer> {
        (**self).timers()
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>> {
        (**self).detect(frame)
    }

    fn timers(&self) -> Vec<Timer> {
        (**self).timers()
    }
}
