//! Common functionality for object detection.
//!
//! Single-shot detectors produce one [`Detection`] per anchor that fires. [`ssd`] computes the
//! anchors, [`nms`] merges the duplicate detections of each object.

pub mod nms;
pub mod ssd;

/// An axis-aligned rectangle with float coordinates, stored as center and size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    xc: f32,
    yc: f32,
    w: f32,
    h: f32,
}

impl Rect {
    /// Creates a rectangle centered at `(xc, yc)`.
    pub fn from_center(xc: f32, yc: f32, w: f32, h: f32) -> Self {
        Self { xc, yc, w, h }
    }

    #[inline]
    pub fn x_center(&self) -> f32 {
        self.xc
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.yc
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.w
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.h
    }

    fn top_left(&self) -> (f32, f32) {
        (self.xc - self.w / 2.0, self.yc - self.h / 2.0)
    }

    fn bottom_right(&self) -> (f32, f32) {
        (self.xc + self.w / 2.0, self.yc + self.h / 2.0)
    }

    /// Returns the amount of area covered by `self`.
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    fn intersection_area(&self, other: &Self) -> f32 {
        let (l1, t1) = self.top_left();
        let (l2, t2) = other.top_left();
        let (r1, b1) = self.bottom_right();
        let (r2, b2) = other.bottom_right();

        let w = (r1.min(r2) - l1.max(l2)).max(0.0);
        let h = (b1.min(b2) - t1.max(t2)).max(0.0);
        w * h
    }

    /// Computes the Intersection over Union (IOU) of `self` and `other`.
    ///
    /// Returns 0.0 if both rectangles are empty.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// A 2D keypoint produced as part of a [`Detection`].
///
/// The meaning of a keypoint depends on the detector and on its index in the keypoint list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the object, a confidence value in `[0, 1]`,
/// and a possibly empty list of keypoints. All coordinates are in the same (detector specific)
/// pixel coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    confidence: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self::with_keypoints(confidence, rect, Vec::new())
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Applies `f` to the rectangle center and every keypoint, and scales the rectangle size by
    /// `scale`.
    ///
    /// Used to move a detection from network input coordinates into image coordinates.
    pub(crate) fn transform(&mut self, scale: f32, f: impl Fn(f32, f32) -> (f32, f32)) {
        let (xc, yc) = f(self.rect.xc, self.rect.yc);
        self.rect = Rect::from_center(xc, yc, self.rect.w * scale, self.rect.h * scale);
        for kp in &mut self.keypoints {
            (kp.x, kp.y) = f(kp.x, kp.y);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn empty_rects() {
        let zero = Rect::from_center(0.0, 0.0, 0.0, 0.0);
        let also_zero = Rect::from_center(1.0, 0.0, 0.0, 0.0);
        assert_eq!(zero.area(), 0.0);
        assert_eq!(zero.intersection_area(&also_zero), 0.0);
        assert_eq!(zero.iou(&also_zero), 0.0);
    }

    #[test]
    fn intersection() {
        let a = Rect::from_center(1.0, 0.0, 1.0, 1.0);
        let b = Rect::from_center(2.0, 0.0, 1.0, 1.0);
        assert_eq!(a.intersection_area(&b), 0.0);
        assert_eq!(b.intersection_area(&a), 0.0);

        let c = Rect::from_center(1.5, 0.0, 1.0, 1.0);
        assert_relative_eq!(a.intersection_area(&c), 0.5);
    }

    #[test]
    fn iou_of_nested_rects() {
        let smaller = Rect::from_center(9.0, 9.0, 1.0, 1.0);
        let bigger = Rect::from_center(9.0, 9.0, 2.0, 2.0);
        assert_eq!(bigger.area(), 4.0);
        assert_eq!(smaller.iou(&bigger), 0.25);
        assert_eq!(bigger.iou(&smaller), 0.25);
        assert_eq!(smaller.iou(&smaller), 1.0);
    }

    #[test]
    fn transform_moves_keypoints() {
        let mut det = Detection::with_keypoints(
            0.9,
            Rect::from_center(10.0, 20.0, 4.0, 2.0),
            vec![Keypoint::new(0.0, 0.0)],
        );
        det.transform(2.0, |x, y| (x * 2.0 + 1.0, y * 2.0));
        assert_eq!(det.bounding_rect(), Rect::from_center(21.0, 40.0, 8.0, 4.0));
        assert_eq!(det.keypoints(), &[Keypoint::new(1.0, 0.0)]);
        assert_eq!(det.confidence(), 0.9);
    }
}
