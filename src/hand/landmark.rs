//! Hand landmark prediction.

use std::path::Path;

use anyhow::{bail, Context};
use image::{
    imageops::{self, FilterType},
    RgbImage,
};

use crate::{
    detection::Rect,
    image::{BoundingBox, Frame},
    landmark::LandmarkSet,
    nn::{self, NeuralNetwork, Outputs},
    resolution::Resolution,
    timer::{SharedTimer, Timer},
};

/// Number of landmarks the network reports per hand.
pub const NUM_LANDMARKS: usize = 21;

const INPUT_RES: Resolution = Resolution::new(224, 224);
const INPUT_SHAPE: [usize; 4] = [1, 3, 224, 224];

/// The MediaPipe hand landmark network.
///
/// The network looks at a square crop around one hand and estimates its landmarks, along with a
/// presence score. Landmarks are reported when the presence score reaches the configured minimum
/// confidence.
pub struct HandLandmarkNetwork {
    network: NeuralNetwork,
    min_confidence: f32,
    t_resize: SharedTimer,
    t_infer: SharedTimer,
}

impl HandLandmarkNetwork {
    /// Loads the landmark network from an ONNX file.
    pub fn load<P: AsRef<Path>>(path: P, min_confidence: f32) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let network = NeuralNetwork::from_path(path)?
            .with_input_shape(INPUT_SHAPE)
            .load()
            .with_context(|| format!("failed to load hand landmark model '{}'", path.display()))?;
        Self::new(network, min_confidence)
    }

    pub fn new(network: NeuralNetwork, min_confidence: f32) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&min_confidence) {
            bail!(
                "minimum hand confidence must be in [0, 1], got {}",
                min_confidence
            );
        }
        if network.num_inputs() != 1 || network.num_outputs() != 4 {
            bail!(
                "hand landmark model must have 1 input and 4 outputs, but has {} and {}",
                network.num_inputs(),
                network.num_outputs(),
            );
        }

        Ok(Self {
            network,
            min_confidence,
            t_resize: SharedTimer::new("landmark resize"),
            t_infer: SharedTimer::new("landmarks"),
        })
    }

    pub fn timers(&self) -> [Timer; 2] {
        [self.t_resize.get(), self.t_infer.get()]
    }

    /// Estimates the landmarks of the hand inside `roi`, a rectangle in frame pixels.
    ///
    /// Landmarks are returned relative to the frame, as [`LandmarkSet`] requires. Returns
    /// [`None`] if the region lies outside of the frame or if the hand presence score is too low.
    pub fn estimate(&self, frame: &Frame, roi: &Rect) -> anyhow::Result<Option<LandmarkSet>> {
        let Some(crop) = Crop::new(roi, frame.resolution()) else {
            log::trace!("hand region {:?} is unusable", roi);
            return Ok(None);
        };
        let Some(input) = self.t_resize.time(|| crop.extract(frame).map(|img| nn::to_nchw(&img)))
        else {
            return Ok(None);
        };

        let outputs = self
            .t_infer
            .time(|| self.network.estimate(&[(&INPUT_SHAPE[..], &input[..])]))?;
        let result = LandmarkResult::from_outputs(&outputs)?;
        log::trace!(
            "hand presence={:.3} handedness={:?}",
            result.presence,
            result.handedness()
        );

        if result.presence < self.min_confidence {
            return Ok(None);
        }
        Ok(Some(result.to_frame_landmarks(&crop, frame.resolution())))
    }
}

/// Raw network result, with landmarks in input pixel coordinates.
struct LandmarkResult {
    landmarks: LandmarkSet,
    presence: f32,
    raw_handedness: f32,
}

impl LandmarkResult {
    fn from_outputs(outputs: &Outputs) -> anyhow::Result<Self> {
        if outputs.len() != 4 {
            bail!("expected 4 landmark network outputs, got {}", outputs.len());
        }
        let screen_landmarks = &outputs[0];
        let presence_flag = &outputs[1];
        let handedness = &outputs[2];

        if screen_landmarks.shape() != [1, NUM_LANDMARKS * 3]
            || presence_flag.shape() != [1, 1]
            || handedness.shape() != [1, 1]
        {
            bail!(
                "unexpected landmark network output shapes {:?}",
                outputs.iter().map(|o| o.shape()).collect::<Vec<_>>()
            );
        }

        let landmarks = LandmarkSet::from_flat(screen_landmarks.as_slice())
            .context("landmark output is not a list of 3D positions")?;
        Ok(Self {
            landmarks,
            presence: presence_flag.as_slice()[0],
            raw_handedness: handedness.as_slice()[0],
        })
    }

    fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Maps landmarks from crop input pixels to `[0, 1]` coordinates relative to the frame.
    fn to_frame_landmarks(&self, crop: &Crop, res: Resolution) -> LandmarkSet {
        let mut landmarks = self.landmarks.clone();
        landmarks.map_positions(|pos| crop.to_frame(pos, res));
        landmarks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// Largest crop side, relative to the larger frame dimension.
const MAX_CROP_SCALE: f32 = 4.0;

/// A square frame region scaled to the network input.
///
/// The region may extend past the frame; that part of the input is black.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Crop {
    bbox: BoundingBox,
}

impl Crop {
    /// Computes the square crop enclosing `roi`.
    ///
    /// Returns [`None`] if `roi` is not finite or absurdly large for a frame of resolution `res`.
    fn new(roi: &Rect, res: Resolution) -> Option<Self> {
        let side = roi.width().max(roi.height()).ceil().max(1.0);
        let max_side = res.width().max(res.height()) as f32 * MAX_CROP_SCALE;
        if !(side <= max_side && roi.x_center().is_finite() && roi.y_center().is_finite()) {
            return None;
        }
        let limit = max_side * 2.0;
        if roi.x_center().abs() > limit || roi.y_center().abs() > limit {
            return None;
        }

        let x_min = (roi.x_center() - side / 2.0).floor() as i64;
        let y_min = (roi.y_center() - side / 2.0).floor() as i64;
        let side = side as i64;
        Some(Self {
            bbox: BoundingBox::new(x_min, y_min, x_min + side, y_min + side),
        })
    }

    /// Network input pixels per frame pixel.
    fn scale(&self) -> f32 {
        INPUT_RES.width() as f32 / self.bbox.width() as f32
    }

    /// Cuts the crop out of `frame` and scales it to the network input resolution.
    ///
    /// Returns [`None`] if the crop has no pixels inside the frame.
    fn extract(&self, frame: &Frame) -> Option<RgbImage> {
        let visible = self.bbox.clip_to(frame.resolution());
        if visible.is_empty() {
            return None;
        }

        let rgb = frame.to_rgb();
        let part = imageops::crop_imm(
            rgb.rgb_buffer(),
            visible.x_min() as u32,
            visible.y_min() as u32,
            visible.width() as u32,
            visible.height() as u32,
        )
        .to_image();

        let scale = self.scale();
        let width = ((visible.width() as f32 * scale).round() as u32).clamp(1, INPUT_RES.width());
        let height =
            ((visible.height() as f32 * scale).round() as u32).clamp(1, INPUT_RES.height());
        let resized = imageops::resize(&part, width, height, FilterType::Triangle);

        let mut canvas = RgbImage::new(INPUT_RES.width(), INPUT_RES.height());
        let x = ((visible.x_min() - self.bbox.x_min()) as f32 * scale).round() as i64;
        let y = ((visible.y_min() - self.bbox.y_min()) as f32 * scale).round() as i64;
        imageops::overlay(&mut canvas, &resized, x, y);
        Some(canvas)
    }

    /// Maps a landmark from network input pixels to coordinates relative to a frame of
    /// resolution `res`.
    fn to_frame(&self, [x, y, z]: [f32; 3], res: Resolution) -> [f32; 3] {
        let scale = self.scale();
        [
            (self.bbox.x_min() as f32 + x / scale) / res.width() as f32,
            (self.bbox.y_min() as f32 + y / scale) / res.height() as f32,
            z / INPUT_RES.width() as f32,
        ]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{image::ColorOrder, nn::OutputTensor};

    #[test]
    fn crop_is_square() {
        let res = Resolution::new(640, 480);
        let crop = Crop::new(&Rect::from_center(100.0, 50.0, 40.0, 60.5), res).unwrap();
        assert_eq!(crop.bbox, BoundingBox::new(69, 19, 130, 80));
        assert_relative_eq!(crop.scale(), 224.0 / 61.0);

        assert_eq!(Crop::new(&Rect::from_center(f32::NAN, 0.0, 10.0, 10.0), res), None);
        assert_eq!(Crop::new(&Rect::from_center(0.0, 0.0, f32::INFINITY, 1.0), res), None);
        assert_eq!(Crop::new(&Rect::from_center(1e30, 0.0, 10.0, 10.0), res), None);
        assert_eq!(Crop::new(&Rect::from_center(0.0, 0.0, 1e9, 1e9), res), None);
    }

    #[test]
    fn crop_pads_outside_of_frame() {
        // White frame, the crop's left half lies outside of it.
        let frame = Frame::filled(Resolution::new(100, 100), ColorOrder::Rgb, [255, 255, 255]);
        let crop = Crop::new(&Rect::from_center(0.0, 50.0, 100.0, 100.0), frame.resolution())
            .unwrap();
        let image = crop.extract(&frame).unwrap();
        assert_eq!((image.width(), image.height()), (224, 224));
        assert_eq!(image.get_pixel(10, 112).0, [0, 0, 0]);
        assert!(image.get_pixel(200, 112).0.iter().all(|&c| c > 250));

        let outside = Crop::new(&Rect::from_center(-200.0, 50.0, 100.0, 100.0), frame.resolution())
            .unwrap();
        assert!(outside.extract(&frame).is_none());
    }

    #[test]
    fn landmarks_map_back_to_frame() {
        let res = Resolution::new(640, 480);
        // 112x112 pixel crop at (320, 240), so 2 input pixels per frame pixel.
        let crop = Crop::new(&Rect::from_center(376.0, 296.0, 112.0, 112.0), res).unwrap();
        assert_eq!(crop.bbox, BoundingBox::new(320, 240, 432, 352));

        let result = LandmarkResult {
            landmarks: LandmarkSet::new(vec![[0.0, 0.0, 0.0], [224.0, 112.0, 22.4]]),
            presence: 1.0,
            raw_handedness: 0.0,
        };
        let lms = result.to_frame_landmarks(&crop, res);
        assert_relative_eq!(lms.get(0).x(), 0.5);
        assert_relative_eq!(lms.get(0).y(), 0.5);
        assert_relative_eq!(lms.get(1).x(), 432.0 / 640.0);
        assert_relative_eq!(lms.get(1).y(), 296.0 / 480.0);
        assert_relative_eq!(lms.get(1).z(), 0.1);
    }

    fn tensor(shape: &[usize], data: Vec<f32>) -> OutputTensor {
        OutputTensor::new(shape, data)
    }

    #[test]
    fn parses_outputs() {
        let outputs = [
            tensor(&[1, 63], (0..63).map(|i| i as f32).collect()),
            tensor(&[1, 1], vec![0.9]),
            tensor(&[1, 1], vec![0.8]),
            tensor(&[1, 63], vec![0.0; 63]),
        ]
        .into_iter()
        .collect::<Outputs>();

        let result = LandmarkResult::from_outputs(&outputs).unwrap();
        assert_eq!(result.landmarks.len(), NUM_LANDMARKS);
        assert_eq!(result.landmarks.get(1).position(), [3.0, 4.0, 5.0]);
        assert_relative_eq!(result.presence, 0.9);
        assert_eq!(result.handedness(), Handedness::Right);
    }

    #[test]
    fn rejects_bad_outputs() {
        let outputs = [tensor(&[1, 1], vec![0.9])].into_iter().collect::<Outputs>();
        assert!(LandmarkResult::from_outputs(&outputs).is_err());
    }
}
