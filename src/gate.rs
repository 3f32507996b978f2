//! Confidence gating of classifier outputs.

use crate::classifier::PredictionDistribution;
use crate::error::{Error, Result};
use crate::pipeline::RejectReason;

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The most likely class is confident enough to be reported.
    Accepted { index: usize, confidence: f32 },
    Rejected(RejectReason),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted { .. })
    }
}

/// Picks the most likely class of `dist` and accepts it if its score is at least `threshold`.
///
/// Ties are broken in favor of the lowest index. NaN scores never win.
///
/// # Errors
///
/// Returns [`Error::InvalidDistribution`] if `dist` is empty or contains only NaNs.
pub fn decide(dist: &PredictionDistribution, threshold: f32) -> Result<Decision> {
    if dist.is_empty() {
        return Err(Error::InvalidDistribution(
            "classifier returned no scores".into(),
        ));
    }

    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in dist.scores().iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if score <= max => {}
            _ => best = Some((index, score)),
        }
    }

    let Some((index, confidence)) = best else {
        return Err(Error::InvalidDistribution(format!(
            "all {} scores are NaN",
            dist.len()
        )));
    };

    if confidence >= threshold {
        Ok(Decision::Accepted { index, confidence })
    } else {
        log::trace!(
            "best class {} at {:.3} is below threshold {:.3}",
            index,
            confidence,
            threshold,
        );
        Ok(Decision::Rejected(RejectReason::BelowThreshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(scores: &[f32]) -> PredictionDistribution {
        PredictionDistribution::new(scores.to_vec())
    }

    #[test]
    fn accepts_max() {
        assert_eq!(
            decide(&dist(&[0.1, 0.2, 0.7]), 0.5).unwrap(),
            Decision::Accepted {
                index: 2,
                confidence: 0.7
            }
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(
            decide(&dist(&[0.5, 0.5]), 0.5).unwrap(),
            Decision::Accepted {
                index: 0,
                confidence: 0.5
            }
        );
    }

    #[test]
    fn rejects_below_threshold() {
        assert_eq!(
            decide(&dist(&[0.1, 0.2, 0.7]), 0.8).unwrap(),
            Decision::Rejected(RejectReason::BelowThreshold)
        );
    }

    #[test]
    fn ties_pick_first() {
        assert_eq!(
            decide(&dist(&[0.2, 0.4, 0.4]), 0.0).unwrap(),
            Decision::Accepted {
                index: 1,
                confidence: 0.4
            }
        );
    }

    #[test]
    fn single_class() {
        assert_eq!(
            decide(&dist(&[0.3]), 0.3).unwrap(),
            Decision::Accepted {
                index: 0,
                confidence: 0.3
            }
        );
    }

    #[test]
    fn nan_is_ignored() {
        assert_eq!(
            decide(&dist(&[f32::NAN, 0.6, 0.4]), 0.5).unwrap(),
            Decision::Accepted {
                index: 1,
                confidence: 0.6
            }
        );
        assert!(matches!(
            decide(&dist(&[f32::NAN, f32::NAN]), 0.5),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn empty_is_an_error() {
        assert!(matches!(
            decide(&dist(&[]), 0.5),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn accepted_xor_rejected() {
        for _ in 0..200 {
            let len = fastrand::usize(1..12);
            let scores = (0..len).map(|_| fastrand::f32()).collect::<Vec<_>>();
            let max = scores.iter().copied().fold(f32::MIN, f32::max);
            let threshold = fastrand::f32();

            match decide(&dist(&scores), threshold).unwrap() {
                Decision::Accepted { index, confidence } => {
                    assert!(confidence >= threshold);
                    assert_eq!(confidence, max);
                    assert_eq!(scores[index], max);
                }
                Decision::Rejected(reason) => {
                    assert_eq!(reason, RejectReason::BelowThreshold);
                    assert!(max < threshold);
                }
            }
        }
    }
}
