//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::cmp::Reverse;

use anyhow::bail;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::{image::Frame, resolution::Resolution, timer::Timer};

use super::FrameSource;

/// Format negotiation options.
#[derive(Debug, Default, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
    resolution: Option<Resolution>,
    fps: Option<u32>,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the desired image resolution.
    ///
    /// A lower resolution might be selected if the webcam cannot deliver the desired resolution.
    #[inline]
    pub fn resolution(self, resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..self
        }
    }

    /// Sets the desired frame rate.
    #[inline]
    pub fn fps(self, fps: u32) -> Self {
        Self {
            fps: Some(fps),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

fn negotiate_format(
    device: &Device,
    options: &WebcamOptions,
) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }
    let Some(pixel_format) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let mut formats = Vec::new();
    let FrameSizes::Discrete(sizes) = device.frame_sizes(pixel_format)? else {
        bail!("stepwise or continuous resolutions are not supported");
    };
    for size in sizes {
        let FrameIntervals::Discrete(intervals) =
            device.frame_intervals(pixel_format, size.width(), size.height())?
        else {
            bail!("stepwise or continuous frame rates are not supported");
        };
        for rate in intervals {
            formats.push(FrameFormat {
                resolution: Resolution::new(size.width(), size.height()),
                frame_interval: *rate.fract(),
            });
        }
    }

    // Drop the frame rate wish first, then the resolution wish.
    let attempts = [
        (options.resolution, options.fps),
        (options.resolution, None),
        (None, None),
    ];
    for (resolution, fps) in attempts {
        if let Some(fmt) = pick_format(&formats, resolution, fps) {
            let pixfmt = PixFormat::new(
                fmt.resolution.width(),
                fmt.resolution.height(),
                pixel_format,
            );
            return Ok((pixfmt, fmt.frame_interval));
        }
        log::debug!(
            "no webcam format satisfies resolution={:?} fps={:?}",
            resolution,
            fps
        );
    }

    bail!("failed to negotiate a webcam format")
}

/// Picks the lowest resolution at or above `resolution` that can deliver `fps`, preferring higher
/// frame rates among equal resolutions. Without a resolution wish, picks the largest format.
fn pick_format(
    formats: &[FrameFormat],
    resolution: Option<Resolution>,
    fps: Option<u32>,
) -> Option<FrameFormat> {
    let eligible = formats.iter().copied().filter(|fmt| {
        resolution.map_or(true, |res| {
            fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
        }) && fps.map_or(true, |fps| {
            (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
        })
    });
    match resolution {
        Some(_) => eligible.min_by_key(|fmt| (fmt.resolution.num_pixels(), fmt.frame_interval)),
        None => eligible.max_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval))),
    }
}

/// A webcam yielding a stream of [`Frame`]s.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_impl(dev, &options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => log::debug!("{}", e),
                },
                Err(e) => log::warn!("{}", e),
            }
        }

        match &options.name {
            Some(name) => bail!("no supported webcam named '{}' found", name),
            None => bail!("no supported webcam device found"),
        }
    }

    fn open_impl(dev: Device, options: &WebcamOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        if let Some(name) = &options.name {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );
        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, options)?;
        let capture = dev.video_capture(pixfmt)?;
        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());
        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            resolution,
            1.0 / actual.as_f32(),
        );

        Ok(Some(Self {
            stream: capture.into_stream(2)?,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Reads the next frame from the camera, blocking until one is available.
    ///
    /// Webcams occasionally deliver corrupted MJPEG frames. Those are logged and replaced with a
    /// black frame, which contains no hand, instead of ending the stream.
    pub fn read(&mut self) -> anyhow::Result<Frame> {
        let resolution = self.resolution;
        let t_decode = &mut self.t_decode;
        let dequeue_guard = self.t_dequeue.start();
        self.stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                let frame = match t_decode.time(|| Frame::decode_jpeg(&buf)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("webcam decode error: {}", e);
                        Frame::new(resolution.width(), resolution.height())
                    }
                };
                Ok(frame)
            })
            .map_err(Into::into)
    }

    /// Returns profiling timers for webcam access and decoding.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_dequeue, &self.t_decode].into_iter()
    }
}

impl FrameSource for Webcam {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        self.read().map(Some)
    }
}
