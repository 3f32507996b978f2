//! Preparation of hand crops for the gesture classifier.

use std::fmt;

use image::imageops::{self, FilterType};

use crate::image::{BoundingBox, Frame};

/// Width and height of the classifier's input image.
pub const INPUT_SIZE: u32 = 64;

/// Shape of a [`NormalizedTensor`]: `[batch, height, width, channels]`.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3];

/// A `1x64x64x3` RGB image tensor with every value in `[0, 1]`.
///
/// Data is stored in row-major NHWC order, which is what Keras-trained CNNs expect.
#[derive(Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Box<[f32]>,
}

impl NormalizedTensor {
    /// Creates a tensor from raw NHWC data.
    ///
    /// Returns [`None`] if `data` doesn't have exactly `64 * 64 * 3` elements.
    pub fn from_raw(data: impl Into<Box<[f32]>>) -> Option<Self> {
        let data = data.into();
        if data.len() != INPUT_SHAPE.iter().product::<usize>() {
            return None;
        }
        Some(Self { data })
    }

    #[inline]
    pub fn shape(&self) -> [usize; 4] {
        INPUT_SHAPE
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the value of channel `c` at pixel `(x, y)`.
    pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
        let [_, h, w, ch] = INPUT_SHAPE;
        assert!(x < w && y < h && c < ch);
        self.data[(y * w + x) * ch + c]
    }
}

impl fmt::Debug for NormalizedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NormalizedTensor {:?}", INPUT_SHAPE)
    }
}

/// Crops `frame` to `bbox`, scales the crop to 64x64 and maps every channel to `[0, 1]`.
///
/// `bbox` is clipped to the frame first. If nothing of it remains, this returns [`None`]: the hand
/// is unusable and should be skipped. That happens routinely for hands at the edge of the frame or
/// with collapsed landmarks, so it is not an error.
///
/// The returned tensor is RGB regardless of the frame's color order.
pub fn normalize(frame: &Frame, bbox: &BoundingBox) -> Option<NormalizedTensor> {
    let rgb = frame.to_rgb();
    let crop = bbox.clip_to(rgb.resolution());
    if crop.is_empty() {
        log::trace!("{:?} has no pixels inside {:?}, skipping", bbox, frame);
        return None;
    }

    // Clipping guarantees all coordinates are within the frame, so they fit in a `u32`.
    let view = imageops::crop_imm(
        rgb.rgb_buffer(),
        crop.x_min() as u32,
        crop.y_min() as u32,
        crop.width() as u32,
        crop.height() as u32,
    );
    let resized = imageops::resize(&*view, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let data = resized
        .as_raw()
        .iter()
        .map(|&value| f32::from(value) / 255.0)
        .collect::<Box<[f32]>>();
    debug_assert_eq!(data.len(), INPUT_SHAPE.iter().product::<usize>());

    Some(NormalizedTensor { data })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::image::ColorOrder;
    use crate::resolution::Resolution;

    #[test]
    fn empty_box_is_skipped() {
        let frame = Frame::new(100, 100);
        assert!(normalize(&frame, &BoundingBox::new(10, 10, 10, 50)).is_none());
        assert!(normalize(&frame, &BoundingBox::new(10, 10, 50, 10)).is_none());
        assert!(normalize(&frame, &BoundingBox::new(50, 50, 50, 50)).is_none());
    }

    #[test]
    fn box_outside_frame_is_skipped() {
        let frame = Frame::new(100, 100);
        assert!(normalize(&frame, &BoundingBox::new(100, 0, 150, 50)).is_none());
        assert!(normalize(&frame, &BoundingBox::new(-50, -50, 0, 0)).is_none());
    }

    #[test]
    fn empty_frame_is_skipped() {
        let frame = Frame::new(0, 0);
        assert!(normalize(&frame, &BoundingBox::new(0, 0, 10, 10)).is_none());
    }

    #[test]
    fn scales_values() {
        let frame = Frame::filled(Resolution::new(20, 10), ColorOrder::Rgb, [255, 0, 51]);
        let tensor = normalize(&frame, &BoundingBox::new(2, 2, 8, 8)).unwrap();
        assert_eq!(tensor.shape(), [1, 64, 64, 3]);
        assert_eq!(tensor.as_slice().len(), 64 * 64 * 3);
        for y in [0, 31, 63] {
            for x in [0, 17, 63] {
                assert_relative_eq!(tensor.get(x, y, 0), 1.0);
                assert_relative_eq!(tensor.get(x, y, 1), 0.0);
                assert_relative_eq!(tensor.get(x, y, 2), 0.2);
            }
        }
        assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn bgr_frames_become_rgb() {
        let frame = Frame::filled(Resolution::new(8, 8), ColorOrder::Bgr, [255, 0, 0]);
        let tensor = normalize(&frame, &frame.bounds()).unwrap();
        assert_relative_eq!(tensor.get(3, 3, 0), 0.0);
        assert_relative_eq!(tensor.get(3, 3, 2), 1.0);
    }

    #[test]
    fn partially_outside_box_is_clipped() {
        // Left half black, right half white.
        let res = Resolution::new(10, 10);
        let data = (0..100)
            .flat_map(|i| if i % 10 < 5 { [0; 3] } else { [255; 3] })
            .collect::<Vec<_>>();
        let frame = Frame::from_raw(res, ColorOrder::Rgb, &data);

        // Only the white half is inside the frame.
        let tensor = normalize(&frame, &BoundingBox::new(5, -20, 40, 30)).unwrap();
        assert!(tensor.as_slice().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn from_raw_checks_size() {
        assert!(NormalizedTensor::from_raw(vec![0.0; 64 * 64 * 3]).is_some());
        assert!(NormalizedTensor::from_raw(vec![0.0; 64 * 64]).is_none());
    }
}
