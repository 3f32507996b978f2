//! Neural Network inference.
//!
//! Networks are loaded from ONNX files with [tract] and run on the CPU. A loaded
//! [`NeuralNetwork`] is immutable and can be shared between threads; running it does not modify it.
//!
//! [tract]: https://github.com/sonos/tract

use std::{
    borrow::Cow,
    ops::{Index, Range},
    path::Path,
    sync::Arc,
};

use anyhow::bail;
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use tract_onnx::prelude::{
    DatumExt, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, Tensor,
    TypedFact, TypedOp,
};

use crate::{image::Frame, resolution::Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Neural network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    input_shape: Option<Vec<usize>>,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>) -> Self {
        Self {
            model_data: data,
            input_shape: None,
        }
    }

    /// Fixes the shape of the network's (single) input.
    ///
    /// Models exported from training frameworks commonly leave the batch dimension symbolic. This
    /// pins it down so that the network can be fully optimized.
    pub fn with_input_shape<S>(mut self, shape: S) -> Self
    where
        S: Into<Vec<usize>>,
    {
        self.input_shape = Some(shape.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let mut graph = tract_onnx::onnx().model_for_read(&mut &*self.model_data)?;
        if let Some(shape) = self.input_shape {
            graph = graph.with_input_fact(0, f32::fact(shape).into())?;
        }
        let graph = graph.into_optimized()?;
        let model = SimplePlan::new(graph)?;

        Ok(NeuralNetwork(Arc::new(model)))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Model>);

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<'a, P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'a>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl<'a>(path: &Path) -> anyhow::Result<Loader<'a>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read '{}': {}", path.display(), e))?;
        Ok(Loader::new(model_data.into()))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: &[u8]) -> Loader<'_> {
        Loader::new(raw.into())
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.model().inputs.len()
    }

    /// Returns the number of output nodes of the network.
    pub fn num_outputs(&self) -> usize {
        self.0.model().outputs.len()
    }

    /// Returns an iterator over the network's input node information.
    pub fn inputs(&self) -> InfoIter<'_> {
        InfoIter {
            net: self,
            ids: 0..self.num_inputs(),
            kind: Kind::Input,
        }
    }

    /// Returns an iterator over the network's output node information.
    pub fn outputs(&self) -> InfoIter<'_> {
        InfoIter {
            net: self,
            ids: 0..self.num_outputs(),
            kind: Kind::Output,
        }
    }

    /// Runs the network on a list of `f32` input tensors, returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &[(&[usize], &[f32])]) -> anyhow::Result<Outputs> {
        if inputs.len() != self.num_inputs() {
            bail!(
                "network takes {} inputs, {} were provided",
                self.num_inputs(),
                inputs.len()
            );
        }

        let mut values = TVec::new();
        for (shape, data) in inputs {
            values.push(TValue::from_const(Arc::new(Tensor::from_shape::<f32>(shape, data)?)));
        }

        let outputs = self.0.run(values)?;
        let inner = outputs
            .into_iter()
            .map(|value| {
                let data = value.as_slice::<f32>()?;
                Ok(OutputTensor {
                    shape: value.shape().into(),
                    data: data.into(),
                })
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Outputs { inner })
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Input,
    Output,
}

/// Iterator over a [`NeuralNetwork`]s input or output node information.
pub struct InfoIter<'a> {
    net: &'a NeuralNetwork,
    ids: Range<usize>,
    kind: Kind,
}

impl<'a> Iterator for InfoIter<'a> {
    type Item = NodeInfo<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;

        let model = self.net.0.model();
        let (fact, outlet) = match self.kind {
            Kind::Input => (model.input_fact(id), model.inputs[id]),
            Kind::Output => (model.output_fact(id), model.outputs[id]),
        };
        let fact = fact.ok()?;

        Some(NodeInfo {
            shape: fact.shape.as_concrete(),
            name: &model.node(outlet.node).name,
        })
    }
}

/// Information about a neural network input or output node.
#[derive(Debug)]
pub struct NodeInfo<'a> {
    shape: Option<&'a [usize]>,
    name: &'a str,
}

impl<'a> NodeInfo<'a> {
    /// Returns the tensor shape of this node, or [`None`] if it is symbolic.
    #[inline]
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }
}

/// An `f32` tensor computed by a network.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    shape: Box<[usize]>,
    data: Box<[f32]>,
}

impl OutputTensor {
    pub fn new(shape: &[usize], data: impl Into<Box<[f32]>>) -> Self {
        Self {
            shape: shape.into(),
            data: data.into(),
        }
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the tensor's elements in row-major order.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: TVec<OutputTensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputTensor> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = OutputTensor;

    fn index(&self, index: usize) -> &OutputTensor {
        &self.inner[index]
    }
}

impl FromIterator<OutputTensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = OutputTensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// Placement of an image scaled into a network input while keeping its aspect ratio.
///
/// The scaled image is centered, the remaining border is padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Letterbox {
    pub width: u32,
    pub height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    pub fn fit(res: Resolution, input: Resolution) -> Self {
        let scale = f32::min(
            input.width() as f32 / res.width() as f32,
            input.height() as f32 / res.height() as f32,
        );
        let width = ((res.width() as f32 * scale).round() as u32).clamp(1, input.width());
        let height = ((res.height() as f32 * scale).round() as u32).clamp(1, input.height());
        Self {
            width,
            height,
            pad_x: (input.width() - width) / 2,
            pad_y: (input.height() - height) / 2,
        }
    }

    /// Maps a point in network input pixels to `[0, 1]` coordinates relative to the fitted image.
    pub fn to_relative(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.width as f32,
            (y - self.pad_y as f32) / self.height as f32,
        )
    }
}

/// Scales `frame` into a black RGB image of resolution `input`, centered and keeping its aspect
/// ratio.
pub(crate) fn letterbox(frame: &Frame, input: Resolution) -> (RgbImage, Letterbox) {
    let fit = Letterbox::fit(frame.resolution(), input);
    let rgb = frame.to_rgb();
    let resized = imageops::resize(rgb.rgb_buffer(), fit.width, fit.height, FilterType::Triangle);

    let mut canvas = RgbImage::new(input.width(), input.height());
    imageops::overlay(&mut canvas, &resized, fit.pad_x.into(), fit.pad_y.into());
    (canvas, fit)
}

/// Converts an RGB image to a planar `[1, 3, H, W]` tensor with values in `[0, 1]`.
pub(crate) fn to_nchw(image: &RgbImage) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let mut data = vec![0.0; plane * 3];
    for (i, pixel) in image.pixels().enumerate() {
        for (c, &value) in pixel.0.iter().enumerate() {
            data[c * plane + i] = f32::from(value) / 255.0;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_extension() {
        let err = NeuralNetwork::from_path("gesture_model.keras").err().unwrap();
        assert!(err.to_string().contains(".onnx"), "{err}");
    }

    #[test]
    fn missing_file() {
        assert!(NeuralNetwork::from_path("/nonexistent/model.onnx").is_err());
    }

    #[test]
    fn garbage_model() {
        assert!(NeuralNetwork::from_onnx(b"not a protobuf").load().is_err());
    }

    #[test]
    fn outputs_index() {
        let outputs = [OutputTensor::new(&[1, 2], vec![0.25, 0.75])]
        .into_iter()
        .collect::<Outputs>();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].shape(), &[1, 2]);
        assert_eq!(outputs[0].as_slice(), &[0.25, 0.75]);
    }

    #[test]
    fn letterbox_wide_frame() {
        let fit = Letterbox::fit(Resolution::new(640, 480), Resolution::new(224, 224));
        assert_eq!(
            fit,
            Letterbox {
                width: 224,
                height: 168,
                pad_x: 0,
                pad_y: 28,
            }
        );
        assert_eq!(fit.to_relative(0.0, 28.0), (0.0, 0.0));
        assert_eq!(fit.to_relative(224.0, 196.0), (1.0, 1.0));
    }

    #[test]
    fn letterbox_image_is_input_sized() {
        let frame = Frame::filled(
            Resolution::new(40, 10),
            crate::image::ColorOrder::Rgb,
            [255, 255, 255],
        );
        let (image, _) = letterbox(&frame, Resolution::new(192, 192));
        assert_eq!((image.width(), image.height()), (192, 192));
        // Padding is black, content is white.
        assert_eq!(image.get_pixel(96, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(96, 96).0, [255, 255, 255]);
    }

    #[test]
    fn nchw_layout() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        image.put_pixel(1, 0, image::Rgb([0, 0, 255]));
        assert_eq!(to_nchw(&image), [1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn network_is_shareable() {
        assert_send_sync::<NeuralNetwork>();
    }
}
