//! Non-Maximum Suppression and Averaging.
//!
//! Single-Shot MultiBox Detectors (SSD) produce duplicate detections for individual objects.
//! Non-Maximum Suppression (NMS) filters these duplicates out, leaving a single detection for each
//! object.
//!
//! Overlapping detections are merged into their confidence-weighted average, which is more stable
//! across frames than keeping only the most confident one.

use super::{Detection, Keypoint, Rect};

/// A non-maximum suppression algorithm.
pub struct NonMaxSuppression {
    iou_thresh: f32,
}

impl NonMaxSuppression {
    /// Creates a suppressor merging detections whose intersection-over-union reaches
    /// `iou_thresh`.
    pub fn new(iou_thresh: f32) -> Self {
        Self { iou_thresh }
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// The result is ordered by descending confidence of the detection seeding each group.
    pub fn process(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        let mut out = Vec::new();

        // Ascending confidence, the most confident detection is popped first.
        detections.sort_unstable_by(|a, b| a.confidence.total_cmp(&b.confidence));

        while let Some(seed) = detections.pop() {
            let (overlapping, rest) = detections
                .into_iter()
                .partition::<Vec<_>, _>(|other| seed.rect.iou(&other.rect) >= self.iou_thresh);
            detections = rest;
            out.push(average(seed, &overlapping));
        }

        out
    }
}

/// Computes the confidence-weighted average of `seed` and the detections overlapping it.
///
/// The result keeps the seed's confidence.
fn average(seed: Detection, overlapping: &[Detection]) -> Detection {
    if overlapping.is_empty() {
        return seed;
    }

    let mut divisor = 0.0;
    let (mut xc, mut yc, mut w, mut h) = (0.0, 0.0, 0.0, 0.0);
    let mut keypoints = vec![(0.0, 0.0); seed.keypoints.len()];
    for det in std::iter::once(&seed).chain(overlapping) {
        let factor = det.confidence;
        divisor += factor;
        xc += det.rect.xc * factor;
        yc += det.rect.yc * factor;
        w += det.rect.w * factor;
        h += det.rect.h * factor;
        for (acc, kp) in keypoints.iter_mut().zip(&det.keypoints) {
            acc.0 += kp.x * factor;
            acc.1 += kp.y * factor;
        }
    }

    if divisor <= 0.0 {
        return seed;
    }
    Detection::with_keypoints(
        seed.confidence,
        Rect::from_center(xc / divisor, yc / divisor, w / divisor, h / divisor),
        keypoints
            .into_iter()
            .map(|(x, y)| Keypoint::new(x / divisor, y / divisor))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_merges_overlapping() {
        let nms = NonMaxSuppression::new(0.3);

        let a = Detection::new(0.6, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.55, Rect::from_center(0.0, 0.0, 1.5, 1.5));
        let detections = nms.process(vec![b, a]);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence(), 0.6);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let nms = NonMaxSuppression::new(0.3);

        let a = Detection::new(0.7, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.9, Rect::from_center(5.0, 0.0, 1.0, 1.0));

        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 2);
        // Most confident first.
        assert_eq!(detections[0].confidence(), 0.9);
        assert_eq!(detections[1].confidence(), 0.7);
        assert_eq!(
            detections[1].bounding_rect(),
            Rect::from_center(0.0, 0.0, 1.0, 1.0)
        );
    }

    #[test]
    fn nma_averages_detections() {
        let nms = NonMaxSuppression::new(0.0);

        let a = Detection::with_keypoints(
            1.0,
            Rect::from_center(-1.0, 3.0, 1.0, 1.0),
            vec![Keypoint::new(0.0, 0.0)],
        );
        let b = Detection::with_keypoints(
            0.5,
            Rect::from_center(-1.0, 3.0, 4.0, 4.0),
            vec![Keypoint::new(3.0, 6.0)],
        );
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 1.0);
        assert_eq!(d.bounding_rect(), Rect::from_center(-1.0, 3.0, 2.0, 2.0));
        assert_eq!(d.keypoints(), &[Keypoint::new(1.0, 2.0)]);
    }
}
