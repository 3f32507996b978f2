//! Palm detection.

use std::path::Path;

use anyhow::{bail, Context};

use crate::{
    detection::{
        nms::NonMaxSuppression,
        ssd::{Anchor, Anchors, LayerInfo},
        Detection, Keypoint, Rect,
    },
    image::Frame,
    nn::{self, Letterbox, NeuralNetwork, Outputs},
    resolution::Resolution,
    timer::{SharedTimer, Timer},
};

const INPUT_RES: Resolution = Resolution::new(192, 192);
const INPUT_SHAPE: [usize; 4] = [1, 3, 192, 192];

const ANCHOR_LAYERS: [LayerInfo; 2] = [LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)];

/// Palms overlapping at least this much are merged.
const NMS_IOU_THRESH: f32 = 0.3;

/// Box center and size, followed by 7 keypoints.
const BOX_PARAMS: usize = 18;

/// Index of the wrist keypoint.
pub const WRIST: usize = 0;
/// Index of the middle finger knuckle keypoint.
pub const MIDDLE_FINGER_MCP: usize = 2;

/// Finds palms with the MediaPipe palm detection network.
///
/// The network takes a `1x3x192x192` image and outputs box parameters `[1, 2016, 18]` and raw
/// scores `[1, 2016, 1]` for its 2016 SSD anchors.
pub struct PalmDetector {
    network: NeuralNetwork,
    anchors: Anchors,
    nms: NonMaxSuppression,
    min_confidence: f32,
    t_resize: SharedTimer,
    t_infer: SharedTimer,
    t_nms: SharedTimer,
}

impl PalmDetector {
    /// Loads the palm detection network from an ONNX file.
    pub fn load<P: AsRef<Path>>(path: P, min_confidence: f32) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let network = NeuralNetwork::from_path(path)?
            .with_input_shape(INPUT_SHAPE)
            .load()
            .with_context(|| format!("failed to load palm detection model '{}'", path.display()))?;
        Self::new(network, min_confidence)
    }

    pub fn new(network: NeuralNetwork, min_confidence: f32) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&min_confidence) {
            bail!(
                "minimum palm confidence must be in [0, 1], got {}",
                min_confidence
            );
        }
        if network.num_inputs() != 1 || network.num_outputs() != 2 {
            bail!(
                "palm detection model must have 1 input and 2 outputs, but has {} and {}",
                network.num_inputs(),
                network.num_outputs(),
            );
        }

        Ok(Self {
            network,
            anchors: Anchors::calculate(&ANCHOR_LAYERS),
            nms: NonMaxSuppression::new(NMS_IOU_THRESH),
            min_confidence,
            t_resize: SharedTimer::new("palm resize"),
            t_infer: SharedTimer::new("palm infer"),
            t_nms: SharedTimer::new("palm NMS"),
        })
    }

    /// Detects palms in `frame`.
    ///
    /// Detections are in frame pixel coordinates, ordered by descending confidence.
    pub fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        if frame.resolution().is_empty() {
            return Ok(Vec::new());
        }

        let (input, fit) = self.t_resize.time(|| {
            let (image, fit) = nn::letterbox(frame, INPUT_RES);
            (nn::to_nchw(&image), fit)
        });
        let outputs = self
            .t_infer
            .time(|| self.network.estimate(&[(&INPUT_SHAPE[..], &input[..])]))?;

        let raw = extract_detections(&outputs, &self.anchors, self.min_confidence)?;
        log::trace!("{} raw palm detections", raw.len());
        let mut detections = self.t_nms.time(|| self.nms.process(raw));

        for det in &mut detections {
            to_frame_coords(det, &fit, frame.resolution());
        }
        log::trace!("palms: {:?}", detections);
        Ok(detections)
    }

    pub fn timers(&self) -> [Timer; 3] {
        [self.t_resize.get(), self.t_infer.get(), self.t_nms.get()]
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Decodes all detections reaching `min_confidence`, in network input pixel coordinates.
fn extract_detections(
    outputs: &Outputs,
    anchors: &Anchors,
    min_confidence: f32,
) -> anyhow::Result<Vec<Detection>> {
    let num_anchors = anchors.anchor_count();
    if outputs.len() != 2 {
        bail!("expected 2 palm network outputs, got {}", outputs.len());
    }
    // Tell the outputs apart by shape, exporters do not agree on their order.
    let (boxes, scores) = if outputs[0].shape().last() == Some(&BOX_PARAMS) {
        (&outputs[0], &outputs[1])
    } else {
        (&outputs[1], &outputs[0])
    };
    if boxes.shape() != [1, num_anchors, BOX_PARAMS] || scores.shape() != [1, num_anchors, 1] {
        bail!(
            "unexpected palm network output shapes {:?} and {:?}",
            boxes.shape(),
            scores.shape(),
        );
    }

    let detections = scores
        .as_slice()
        .iter()
        .zip(boxes.as_slice().chunks_exact(BOX_PARAMS))
        .enumerate()
        .filter_map(|(index, (&score, params))| {
            let confidence = sigmoid(score);
            (confidence >= min_confidence)
                .then(|| decode_box(&anchors[index], params, confidence))
        })
        .collect();
    Ok(detections)
}

/// Decodes one anchor's box parameters, which are pixel offsets from the anchor center.
fn decode_box(anchor: &Anchor, params: &[f32], confidence: f32) -> Detection {
    let input_w = INPUT_RES.width() as f32;
    let input_h = INPUT_RES.height() as f32;
    let x_anchor = anchor.x_center() * input_w;
    let y_anchor = anchor.y_center() * input_h;

    let rect = Rect::from_center(params[0] + x_anchor, params[1] + y_anchor, params[2], params[3]);
    let keypoints = params[4..]
        .chunks_exact(2)
        .map(|kp| Keypoint::new(kp[0] + x_anchor, kp[1] + y_anchor))
        .collect();
    Detection::with_keypoints(confidence, rect, keypoints)
}

/// Moves a detection from letterboxed network input pixels to frame pixels.
fn to_frame_coords(det: &mut Detection, fit: &Letterbox, res: Resolution) {
    let (w, h) = (res.width() as f32, res.height() as f32);
    det.transform(w / fit.width as f32, |x, y| {
        let (x, y) = fit.to_relative(x, y);
        (x * w, y * h)
    });
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::nn::OutputTensor;

    fn outputs(firing: &[(usize, f32)]) -> Outputs {
        let num_anchors = Anchors::calculate(&ANCHOR_LAYERS).anchor_count();
        let mut boxes = vec![0.0; num_anchors * BOX_PARAMS];
        let mut scores = vec![-10.0; num_anchors];
        for &(index, score) in firing {
            scores[index] = score;
            boxes[index * BOX_PARAMS + 2] = 20.0;
            boxes[index * BOX_PARAMS + 3] = 20.0;
        }
        [
            OutputTensor::new(&[1, num_anchors, 1], scores),
            OutputTensor::new(&[1, num_anchors, BOX_PARAMS], boxes),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn anchor_count() {
        assert_eq!(Anchors::calculate(&ANCHOR_LAYERS).anchor_count(), 2016);
    }

    #[test]
    fn extracts_confident_anchors() {
        let anchors = Anchors::calculate(&ANCHOR_LAYERS);
        // Anchor 0 is the top-left cell of the 24x24 layer, anchor 2015 the bottom-right cell of
        // the 12x12 layer.
        let dets = extract_detections(&outputs(&[(0, 3.0), (2015, 0.0)]), &anchors, 0.4).unwrap();
        assert_eq!(dets.len(), 2);

        assert_relative_eq!(dets[0].confidence(), sigmoid(3.0));
        assert_relative_eq!(dets[0].bounding_rect().x_center(), 4.0);
        assert_relative_eq!(dets[0].bounding_rect().y_center(), 4.0);
        assert_eq!(dets[0].keypoints().len(), 7);
        assert_relative_eq!(dets[0].keypoints()[WRIST].x(), 4.0);

        assert_relative_eq!(dets[1].confidence(), 0.5);
        assert_relative_eq!(dets[1].bounding_rect().x_center(), 184.0);

        let dets = extract_detections(&outputs(&[(0, 3.0), (2015, 0.0)]), &anchors, 0.6).unwrap();
        assert_eq!(dets.len(), 1);
    }

    #[test]
    fn rejects_bad_outputs() {
        let anchors = Anchors::calculate(&ANCHOR_LAYERS);
        let outputs = [OutputTensor::new(&[1, 10, 1], vec![0.0; 10])]
            .into_iter()
            .collect::<Outputs>();
        assert!(extract_detections(&outputs, &anchors, 0.5).is_err());

        let outputs = [
            OutputTensor::new(&[1, 10, 1], vec![0.0; 10]),
            OutputTensor::new(&[1, 10, BOX_PARAMS], vec![0.0; 10 * BOX_PARAMS]),
        ]
        .into_iter()
        .collect::<Outputs>();
        assert!(extract_detections(&outputs, &anchors, 0.5).is_err());
    }

    #[test]
    fn maps_to_frame() {
        let res = Resolution::new(640, 480);
        let fit = Letterbox::fit(res, INPUT_RES);
        // 640x480 fits as 192x144, padded by 24 rows at the top.
        let mut det = Detection::with_keypoints(
            1.0,
            Rect::from_center(96.0, 96.0, 19.2, 19.2),
            vec![Keypoint::new(0.0, 24.0)],
        );
        to_frame_coords(&mut det, &fit, res);
        let rect = det.bounding_rect();
        assert_relative_eq!(rect.x_center(), 320.0, epsilon = 1e-3);
        assert_relative_eq!(rect.y_center(), 240.0, epsilon = 1e-3);
        assert_relative_eq!(rect.width(), 64.0, epsilon = 1e-3);
        assert_relative_eq!(det.keypoints()[0].x(), 0.0);
        assert_relative_eq!(det.keypoints()[0].y(), 0.0, epsilon = 1e-3);
    }
}
