//! The gesture recognition pipeline.
//!
//! A frame goes through the following stages:
//!
//! 1. The [`Detector`] finds hands and their landmarks.
//! 2. For each hand, in detection order, the [region extractor](crate::region) computes its
//!    bounding box and the [normalizer](crate::normalize) turns the box into a classifier input.
//!    Hands without any pixels inside the frame are skipped.
//! 3. The [`Classifier`] scores the hand and the [confidence gate](crate::gate) decides whether the
//!    best label is reported.
//! 4. The first accepted hand is [translated](crate::vocab::translate) and returned.
//!
//! Nothing is carried over between frames.

use std::{fmt, sync::Arc};

use crate::{
    classifier::Classifier,
    detector::Detector,
    error::{Error, Result},
    gate::{self, Decision},
    image::Frame,
    normalize, region,
    timer::Timer,
    vocab::{self, TranslationTable, Vocabulary},
};

/// Why a frame did not produce a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The detector found no hands.
    NoHandDetected,
    /// No detected hand produced a usable classifier input.
    NoValidGesture,
    /// Hands were classified, but no score reached the threshold.
    BelowThreshold,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NoHandDetected => "no_hand_detected",
            RejectReason::NoValidGesture => "no_valid_gesture",
            RejectReason::BelowThreshold => "below_threshold",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running the pipeline on one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureResult {
    Recognized {
        /// Vocabulary label of the gesture.
        label: String,
        confidence: f32,
        /// Display string of the gesture, empty if it has no translation.
        text: String,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl GestureResult {
    pub fn is_recognized(&self) -> bool {
        matches!(self, GestureResult::Recognized { .. })
    }
}

/// Runs the recognition pipeline on `frame`.
///
/// Expected outcomes like "no hand" are returned as [`GestureResult::Rejected`]. An `Err` means
/// that a model failed or broke its contract.
///
/// If at least one hand was classified but all were below `threshold`, the result is
/// [`RejectReason::BelowThreshold`]. If every hand was skipped before classification, it is
/// [`RejectReason::NoValidGesture`].
pub fn recognize(
    frame: &Frame,
    detector: &dyn Detector,
    classifier: &dyn Classifier,
    vocabulary: &Vocabulary,
    table: &TranslationTable,
    threshold: f32,
) -> Result<GestureResult> {
    let frame = frame.to_rgb();
    let hands = detector.detect(&frame)?;
    log::trace!("{} hand(s) in {:?}", hands.len(), frame);
    if hands.is_empty() {
        return Ok(GestureResult::Rejected {
            reason: RejectReason::NoHandDetected,
        });
    }

    let mut reason = RejectReason::NoValidGesture;
    for (i, hand) in hands.iter().enumerate() {
        let bbox = region::extract(hand, frame.width(), frame.height())?;
        let Some(tensor) = normalize::normalize(&frame, &bbox) else {
            log::trace!("hand #{} at {:?} is unusable", i, bbox);
            continue;
        };

        let dist = classifier.classify(&tensor)?;
        if dist.len() != vocabulary.len() {
            return Err(Error::InvalidDistribution(format!(
                "classifier returned {} scores for {} labels",
                dist.len(),
                vocabulary.len(),
            )));
        }

        match gate::decide(&dist, threshold)? {
            Decision::Accepted { index, confidence } => {
                let text = vocab::translate(index, vocabulary, table)?;
                let label = vocabulary
                    .get(index)
                    .ok_or(Error::LabelIndexOutOfRange {
                        index,
                        len: vocabulary.len(),
                    })?
                    .to_string();
                log::debug!("hand #{}: '{}' ({:.3})", i, label, confidence);
                return Ok(GestureResult::Recognized {
                    label,
                    confidence,
                    text,
                });
            }
            Decision::Rejected(r) => reason = r,
        }
    }

    Ok(GestureResult::Rejected { reason })
}

/// The models, labels and threshold of one deployment.
///
/// Everything is immutable after construction, so a `Pipeline` can be shared between threads
/// freely.
#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    vocabulary: Arc<Vocabulary>,
    table: Arc<TranslationTable>,
    threshold: f32,
}

impl Pipeline {
    /// Assembles a pipeline, validating `table` against `vocabulary` and the threshold range.
    pub fn new(
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        vocabulary: Vocabulary,
        table: TranslationTable,
        threshold: f32,
    ) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("confidence threshold must be in [0, 1], got {}", threshold);
        }
        table.validate(&vocabulary)?;

        Ok(Self {
            detector,
            classifier,
            vocabulary: Arc::new(vocabulary),
            table: Arc::new(table),
            threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Returns snapshots of the detector and classifier timers.
    pub fn timers(&self) -> Vec<Timer> {
        let mut timers = self.detector.timers();
        timers.extend(self.classifier.timers());
        timers
    }

    pub fn recognize(&self, frame: &Frame) -> Result<GestureResult> {
        let result = recognize(
            frame,
            &*self.detector,
            &*self.classifier,
            &self.vocabulary,
            &self.table,
            self.threshold,
        );
        if let Err(e) = &result {
            log::error!("recognition failed: {}", e);
        }
        result
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("vocabulary", &self.vocabulary)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
