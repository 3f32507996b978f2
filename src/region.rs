//! Conversion of normalized hand landmarks to pixel-space regions.

use crate::error::{Error, Result};
use crate::image::BoundingBox;
use crate::landmark::LandmarkSet;

/// Computes the pixel-space [`BoundingBox`] spanned by a hand's landmarks.
///
/// Each normalized coordinate is scaled by the frame's width or height and floored. The resulting
/// box uses an exclusive maximum, so a hand whose landmarks all map to the same pixel column or row
/// produces an empty box.
///
/// No clipping is done: landmarks slightly outside of `[0, 1]` yield a box extending past the frame.
///
/// # Errors
///
/// Returns [`Error::InvalidLandmarks`] if `landmarks` is empty or contains non-finite coordinates.
pub fn extract(landmarks: &LandmarkSet, frame_width: u32, frame_height: u32) -> Result<BoundingBox> {
    if landmarks.is_empty() {
        return Err(Error::InvalidLandmarks("landmark set is empty".into()));
    }

    let (w, h) = (frame_width as f32, frame_height as f32);
    let mut points = Vec::with_capacity(landmarks.len());
    for (i, lm) in landmarks.iter().enumerate() {
        if !lm.x().is_finite() || !lm.y().is_finite() {
            return Err(Error::InvalidLandmarks(format!(
                "landmark {i} has non-finite position ({}, {})",
                lm.x(),
                lm.y(),
            )));
        }
        points.push(((lm.x() * w).floor() as i64, (lm.y() * h).floor() as i64));
    }

    let bbox = BoundingBox::bounding(points)
        .ok_or_else(|| Error::InvalidLandmarks("landmark set is empty".into()))?;
    log::trace!("landmarks -> {:?}", bbox);
    Ok(bbox)
}
