//! Detection and pose estimation of human hands.
//!
//! Hands are found in two stages, like MediaPipe Hands does it: a [`PalmDetector`] locates palms in
//! the whole frame, then the [`HandLandmarkNetwork`] estimates the landmarks of every hand in a
//! square crop around its palm.

pub mod detection;
pub mod landmark;

use crate::{
    detection::{Detection, Rect},
    detector::Detector,
    image::Frame,
    landmark::LandmarkSet,
    timer::Timer,
};

pub use detection::PalmDetector;
pub use landmark::HandLandmarkNetwork;

/// Hand region side length, relative to the palm box.
const ROI_SCALE: f32 = 2.6;
/// Shift of the hand region towards the fingers, relative to the palm box height.
const ROI_SHIFT: f32 = 0.5;

/// A [`Detector`] running palm detection followed by landmark estimation.
///
/// Hands are reported in order of descending palm confidence.
pub struct HandDetector {
    palms: PalmDetector,
    landmarks: HandLandmarkNetwork,
    max_hands: usize,
}

impl HandDetector {
    pub const DEFAULT_MAX_HANDS: usize = 2;

    pub fn new(palms: PalmDetector, landmarks: HandLandmarkNetwork) -> Self {
        Self {
            palms,
            landmarks,
            max_hands: Self::DEFAULT_MAX_HANDS,
        }
    }

    /// Sets the maximum number of hands reported per frame. At least 1 hand is always allowed.
    pub fn with_max_hands(self, max_hands: usize) -> Self {
        Self {
            max_hands: max_hands.max(1),
            ..self
        }
    }
}

impl Detector for HandDetector {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>> {
        let palms = self.palms.detect(frame)?;
        log::trace!("{} palm(s) in {:?}", palms.len(), frame);

        let mut hands = Vec::new();
        for palm in palms.iter().take(self.max_hands) {
            if let Some(landmarks) = self.landmarks.estimate(frame, &hand_roi(palm))? {
                hands.push(landmarks);
            }
        }
        Ok(hands)
    }

    fn timers(&self) -> Vec<Timer> {
        self.palms
            .timers()
            .into_iter()
            .chain(self.landmarks.timers())
            .collect()
    }
}

/// Computes the region containing the whole hand from a palm detection, in frame pixels.
///
/// The palm box is enlarged and moved from the wrist towards the fingers.
fn hand_roi(palm: &Detection) -> Rect {
    let rect = palm.bounding_rect();
    let (dx, dy) = match (
        palm.keypoints().get(detection::WRIST),
        palm.keypoints().get(detection::MIDDLE_FINGER_MCP),
    ) {
        (Some(wrist), Some(finger)) => {
            let (dx, dy) = (finger.x() - wrist.x(), finger.y() - wrist.y());
            let len = dx.hypot(dy);
            if len > 0.0 {
                (dx / len, dy / len)
            } else {
                (0.0, -1.0)
            }
        }
        // Upright hand.
        _ => (0.0, -1.0),
    };

    let shift = rect.height() * ROI_SHIFT;
    let side = rect.width().max(rect.height()) * ROI_SCALE;
    Rect::from_center(
        rect.x_center() + dx * shift,
        rect.y_center() + dy * shift,
        side,
        side,
    )
}
