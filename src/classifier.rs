//! Gesture classification of normalized hand crops.

use std::path::Path;

use anyhow::{bail, Context};

use crate::{
    nn::NeuralNetwork,
    normalize::{NormalizedTensor, INPUT_SHAPE},
    timer::{SharedTimer, Timer},
};

/// Per-class scores produced by a [`Classifier`], one per vocabulary label.
///
/// Scores are usually softmax probabilities, but nothing here relies on them summing to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionDistribution {
    scores: Box<[f32]>,
}

impl PredictionDistribution {
    pub fn new(scores: impl Into<Box<[f32]>>) -> Self {
        Self {
            scores: scores.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }
}

impl From<Vec<f32>> for PredictionDistribution {
    fn from(scores: Vec<f32>) -> Self {
        Self::new(scores)
    }
}

/// Maps a [`NormalizedTensor`] to a [`PredictionDistribution`].
///
/// Implementations must be pure: classifying the same tensor twice yields the same scores.
pub trait Classifier: Send + Sync {
    fn classify(&self, tensor: &NormalizedTensor) -> anyhow::Result<PredictionDistribution>;

    /// Returns snapshots of the classifier's timers, if it keeps any.
    fn timers(&self) -> Vec<Timer> {
        Vec::new()
    }
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn classify(&self, tensor: &NormalizedTensor) -> anyhow::Result<PredictionDistribution> {
        (**self).classify(tensor)
    }

    fn timers(&self) -> Vec<Timer> {
        (**self).timers()
    }
}

impl<C: Classifier + ?Sized> Classifier for std::sync::Arc<C> {
    fn classify(&self, tensor: &NormalizedTensor) -> anyhow::Result<PredictionDistribution> {
        (**self).classify(tensor)
    }

    fn timers(&self) -> Vec<Timer> {
        (**self).timers()
    }
}

/// A CNN classifier loaded from an ONNX file.
///
/// The network must take a single `1x64x64x3` input and produce a single output whose last
/// dimension is the number of gesture classes.
pub struct OnnxClassifier {
    network: NeuralNetwork,
    num_classes: usize,
    t_infer: SharedTimer,
}

impl OnnxClassifier {
    /// Loads the classifier at `path`, checking that it outputs `num_classes` scores.
    pub fn load<P: AsRef<Path>>(path: P, num_classes: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let network = NeuralNetwork::from_path(path)?
            .with_input_shape(INPUT_SHAPE)
            .load()
            .with_context(|| format!("failed to load gesture model '{}'", path.display()))?;
        Self::new(network, num_classes)
    }

    /// Wraps an already loaded network.
    pub fn new(network: NeuralNetwork, num_classes: usize) -> anyhow::Result<Self> {
        if network.num_inputs() != 1 || network.num_outputs() != 1 {
            bail!(
                "gesture model must have 1 input and 1 output, but has {} inputs and {} outputs",
                network.num_inputs(),
                network.num_outputs(),
            );
        }

        for input in network.inputs() {
            if let Some(shape) = input.shape() {
                if shape != INPUT_SHAPE {
                    bail!(
                        "gesture model input '{}' has shape {:?}, expected {:?}",
                        input.name(),
                        shape,
                        INPUT_SHAPE,
                    );
                }
            }
        }
        for output in network.outputs() {
            if let Some(shape) = output.shape() {
                if shape.last() != Some(&num_classes) {
                    bail!(
                        "gesture model output '{}' has shape {:?}, but there are {} gesture labels",
                        output.name(),
                        shape,
                        num_classes,
                    );
                }
            }
        }

        log::debug!("loaded gesture model with {} classes", num_classes);
        Ok(Self {
            network,
            num_classes,
            t_infer: SharedTimer::new("classify"),
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, tensor: &NormalizedTensor) -> anyhow::Result<PredictionDistribution> {
        let shape = tensor.shape();
        let outputs = self
            .t_infer
            .time(|| self.network.estimate(&[(&shape[..], tensor.as_slice())]))?;

        let scores = outputs[0].as_slice();
        log::trace!("gesture scores: {:?}", scores);
        Ok(PredictionDistribution::new(scores))
    }

    fn timers(&self) -> Vec<Timer> {
        vec![self.t_infer.get()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(Vec<f32>);

    impl Classifier for Constant {
        fn classify(&self, _: &NormalizedTensor) -> anyhow::Result<PredictionDistribution> {
            Ok(self.0.clone().into())
        }
    }

    #[test]
    fn distribution_accessors() {
        let dist = PredictionDistribution::new(vec![0.1, 0.9]);
        assert_eq!(dist.len(), 2);
        assert!(!dist.is_empty());
        assert_eq!(dist.scores(), &[0.1, 0.9]);
        assert!(PredictionDistribution::new(Vec::new()).is_empty());
    }

    #[test]
    fn forwarding_impls() {
        let tensor = NormalizedTensor::from_raw(vec![0.0; 64 * 64 * 3]).unwrap();
        let clf = std::sync::Arc::new(Constant(vec![0.3, 0.7]));
        let by_ref: &dyn Classifier = &*clf;
        assert_eq!(
            by_ref.classify(&tensor).unwrap(),
            clf.classify(&tensor).unwrap()
        );
    }

    #[test]
    fn load_missing_model() {
        assert!(OnnxClassifier::load("/nonexistent/gesture_model.onnx", 3).is_err());
    }
}
