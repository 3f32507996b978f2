//! Frame sources and the stream-driven recognition loop.

pub mod httpcam;
pub mod webcam;

use std::path::{Path, PathBuf};

use crate::{
    image::Frame,
    pipeline::{GestureResult, Pipeline},
    timer::FpsCounter,
};

/// A source of frames in acquisition order.
pub trait FrameSource {
    /// Returns the next frame, blocking until it is available.
    ///
    /// Returns `Ok(None)` when the source is exhausted. Live cameras never are.
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        (**self).next_frame()
    }
}

/// A source yielding a fixed list of image files, then ending.
pub struct StillImages {
    paths: std::vec::IntoIter<PathBuf>,
}

impl StillImages {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| p.as_ref().to_path_buf())
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }
}

impl FrameSource for StillImages {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        match self.paths.next() {
            Some(path) => {
                log::debug!("loading {}", path.display());
                Frame::load(&path).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Runs `pipeline` on every frame of `source`, strictly in order, passing each result to `sink`.
///
/// Frames are processed one at a time as they arrive; none are buffered or skipped. The loop ends
/// when the source is exhausted or fails, or when a frame fails recognition.
pub fn run_stream<S, F>(mut source: S, pipeline: &Pipeline, mut sink: F) -> anyhow::Result<()>
where
    S: FrameSource,
    F: FnMut(&Frame, &GestureResult),
{
    let mut fps = FpsCounter::new("recognition");
    while let Some(frame) = source.next_frame()? {
        let result = pipeline.recognize(&frame)?;
        sink(&frame, &result);

        let outcome = match &result {
            GestureResult::Recognized { label, .. } => label.clone(),
            GestureResult::Rejected { reason } => reason.to_string(),
        };
        fps.tick_with(
            pipeline
                .timers()
                .iter()
                .map(ToString::to_string)
                .chain([outcome]),
        );
    }
    log::debug!("frame source exhausted");
    Ok(())
}
