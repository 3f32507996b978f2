use std::fmt;

use crate::resolution::Resolution;

/// An axis-aligned pixel rectangle spanning `x_min..x_max` and `y_min..y_max`.
///
/// The maximum coordinates are exclusive, so a box with `x_min == x_max` contains no pixels.
/// Coordinates are signed: a box derived from noisy landmarks may extend past the frame it belongs
/// to, which is legal. Use [`BoundingBox::clip_to`] to restrict it to a frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    x_min: i64,
    y_min: i64,
    x_max: i64,
    y_max: i64,
}

impl BoundingBox {
    /// Creates a box from its corner coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `x_min > x_max` or `y_min > y_max`.
    pub fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64) -> Self {
        assert!(x_min <= x_max, "x_min={}, x_max={}", x_min, x_max);
        assert!(y_min <= y_max, "y_min={}, y_max={}", y_min, y_max);
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Computes the smallest box containing all `(x, y)` points.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = (i64, i64)>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x, y) = iter.next()?;
        let (mut x_min, mut y_min, mut x_max, mut y_max) = (x, y, x, y);
        for (x, y) in iter {
            x_min = x_min.min(x);
            y_min = y_min.min(y);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }
        Some(Self::new(x_min, y_min, x_max, y_max))
    }

    #[inline]
    pub fn x_min(&self) -> i64 {
        self.x_min
    }

    #[inline]
    pub fn y_min(&self) -> i64 {
        self.y_min
    }

    #[inline]
    pub fn x_max(&self) -> i64 {
        self.x_max
    }

    #[inline]
    pub fn y_max(&self) -> i64 {
        self.y_max
    }

    /// Returns the width of the box. Exact for every valid box, including ones spanning the whole
    /// `i64` range.
    #[inline]
    pub fn width(&self) -> u64 {
        self.x_max.abs_diff(self.x_min)
    }

    #[inline]
    pub fn height(&self) -> u64 {
        self.y_max.abs_diff(self.y_min)
    }

    /// Returns the number of pixels contained in `self`, saturating at `u64::MAX`.
    #[inline]
    pub fn area(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    /// Returns whether the box contains no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Computes the intersection of `self` and `other`.
    ///
    /// If the boxes do not overlap, the result is an empty box located at the clamped corner.
    pub fn intersection(&self, other: &BoundingBox) -> BoundingBox {
        let x_min = self.x_min.max(other.x_min);
        let y_min = self.y_min.max(other.y_min);
        let x_max = self.x_max.min(other.x_max).max(x_min);
        let y_max = self.y_max.min(other.y_max).max(y_min);
        BoundingBox::new(x_min, y_min, x_max, y_max)
    }

    /// Restricts `self` to the pixels of an image of resolution `res`.
    pub fn clip_to(&self, res: Resolution) -> BoundingBox {
        let frame = BoundingBox::new(0, 0, i64::from(res.width()), i64::from(res.height()));
        self.intersection(&frame)
    }
}

impl fmt::Debug for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BoundingBox @ ({},{})-({},{})/{}x{}",
            self.x_min,
            self.y_min,
            self.x_max,
            self.y_max,
            self.width(),
            self.height(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding() {
        assert_eq!(
            BoundingBox::bounding([(0, 0), (1, 1), (-1, -1)]).unwrap(),
            BoundingBox::new(-1, -1, 1, 1),
        );
        assert_eq!(
            BoundingBox::bounding([(3, 4)]).unwrap(),
            BoundingBox::new(3, 4, 3, 4),
        );
        assert_eq!(BoundingBox::bounding(Vec::<(i64, i64)>::new()), None);
    }

    #[test]
    fn test_empty() {
        assert!(BoundingBox::new(5, 5, 5, 9).is_empty());
        assert!(BoundingBox::new(5, 5, 9, 5).is_empty());
        assert!(!BoundingBox::new(5, 5, 6, 6).is_empty());
        assert_eq!(BoundingBox::new(-2, 0, 2, 3).area(), 12);
    }

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(
            a.intersection(&BoundingBox::new(5, 5, 20, 20)),
            BoundingBox::new(5, 5, 10, 10)
        );
        assert!(a.intersection(&BoundingBox::new(12, 0, 20, 10)).is_empty());
        assert!(a.intersection(&BoundingBox::new(-20, -20, -5, -5)).is_empty());
    }

    #[test]
    fn test_clip_to() {
        let res = Resolution::new(640, 480);
        assert_eq!(
            BoundingBox::new(-10, -10, 100, 100).clip_to(res),
            BoundingBox::new(0, 0, 100, 100)
        );
        assert_eq!(
            BoundingBox::new(600, 400, 700, 500).clip_to(res),
            BoundingBox::new(600, 400, 640, 480)
        );
        assert!(BoundingBox::new(700, 10, 800, 20).clip_to(res).is_empty());
    }

    #[test]
    fn extreme_coordinates() {
        let huge = BoundingBox::new(i64::MIN, i64::MIN, i64::MAX, i64::MAX);
        assert_eq!(huge.width(), u64::MAX);
        assert_eq!(huge.height(), u64::MAX);
        assert_eq!(huge.area(), u64::MAX);
        assert!(!huge.is_empty());
        assert!(format!("{:?}", huge).contains(&u64::MAX.to_string()));
        assert_eq!(
            huge.clip_to(Resolution::new(640, 480)),
            BoundingBox::new(0, 0, 640, 480)
        );
    }
}
