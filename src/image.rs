//! Frame storage and decoding.
//!
//! This module provides:
//!
//! - The [`Frame`] type, an owned 8-bit 3-channel image in a known [`ColorOrder`].
//! - [`BoundingBox`], an integer pixel rectangle that may extend past the frame it was derived for.

mod rect;


use std::{borrow::Cow, fmt, path::Path};

use anyhow::bail;
use image::{codecs::jpeg::JpegEncoder, ColorType, ImageBuffer, Rgb, RgbImage};

use crate::resolution::Resolution;

pub use rect::*;

#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("jpg" | "jpeg") => Ok(Self::Jpeg),
            Some("png") => Ok(Self::Png),
            _ => bail!(
                "invalid image path '{}' (must have one of the supported extensions)",
                path.display()
            ),
        }
    }

    fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// Order of the color channels in a [`Frame`]'s pixel data.
///
/// Decoded images are always [`ColorOrder::Rgb`]. Raw camera buffers from some capture stacks are
/// [`ColorOrder::Bgr`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorOrder {
    Rgb,
    Bgr,
}

/// A decoded 8-bit color image with 3 channels.
///
/// Frames are immutable once created; the pipeline only ever reads from them.
#[derive(Clone, PartialEq)]
pub struct Frame {
    buf: RgbImage,
    order: ColorOrder,
}

impl Frame {
    /// Loads a frame from the filesystem.
    ///
    /// The path must have a supported file extension (`jpeg`, `jpg` or `png`).
    pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        let format = ImageFormat::from_path(path)?;
        let data = std::fs::read(path)?;
        let buf = image::load_from_memory_with_format(&data, format.to_image_format())?.to_rgb8();
        Ok(Self::from_buffer(buf))
    }

    /// Decodes a frame from an encoded image in memory (JPEG or PNG).
    ///
    /// The format is guessed from the data.
    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let buf = image::load_from_memory(data)?.to_rgb8();
        Ok(Self::from_buffer(buf))
    }

    /// Decodes a JFIF JPEG or Motion JPEG from a byte slice.
    pub fn decode_jpeg(data: &[u8]) -> anyhow::Result<Self> {
        let buf = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgb8();
        Ok(Self::from_buffer(buf))
    }

    fn from_buffer(buf: RgbImage) -> Self {
        Self {
            buf,
            order: ColorOrder::Rgb,
        }
    }

    /// Creates a frame from tightly packed 3-byte pixels in the given channel order.
    ///
    /// # Panics
    ///
    /// Panics if `buf` does not contain exactly `res.width() * res.height() * 3` bytes.
    pub fn from_raw(res: Resolution, order: ColorOrder, buf: &[u8]) -> Self {
        let expected_size = res.num_pixels() as usize * 3;
        assert_eq!(
            expected_size,
            buf.len(),
            "incorrect buffer size {} for {} frame (expected {} bytes)",
            buf.len(),
            res,
            expected_size,
        );

        Self {
            buf: ImageBuffer::from_vec(res.width(), res.height(), buf.to_vec())
                .expect("buffer size does not match frame resolution"),
            order,
        }
    }

    /// Creates a frame of a specified size where every pixel has the value `pixel`.
    ///
    /// `pixel` is interpreted in the given channel `order`.
    pub fn filled(res: Resolution, order: ColorOrder, pixel: [u8; 3]) -> Self {
        Self {
            buf: ImageBuffer::from_pixel(res.width(), res.height(), Rgb(pixel)),
            order,
        }
    }

    /// Creates a black frame of a specified size.
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_buffer(ImageBuffer::new(width, height))
    }

    /// Returns the width of this frame, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    /// Returns the height of this frame, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    #[inline]
    pub fn color_order(&self) -> ColorOrder {
        self.order
    }

    /// Returns the frame's bounds as a [`BoundingBox`] anchored at `(0, 0)`.
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(0, 0, self.width() as i64, self.height() as i64)
    }

    /// Returns the raw channel values at `(x, y)`, in the frame's own channel order.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this frame.
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        self.buf[(x, y)].0
    }

    /// Returns this frame with its channels in RGB order.
    ///
    /// Frames that already are RGB are borrowed, BGR frames are converted.
    pub fn to_rgb(&self) -> Cow<'_, Frame> {
        match self.order {
            ColorOrder::Rgb => Cow::Borrowed(self),
            ColorOrder::Bgr => {
                let mut buf = self.buf.clone();
                for pixel in buf.pixels_mut() {
                    pixel.0.swap(0, 2);
                }
                Cow::Owned(Self {
                    buf,
                    order: ColorOrder::Rgb,
                })
            }
        }
    }

    /// Gives access to the underlying RGB buffer.
    ///
    /// Only meaningful if [`Frame::color_order`] is [`ColorOrder::Rgb`].
    pub(crate) fn rgb_buffer(&self) -> &RgbImage {
        debug_assert_eq!(self.order, ColorOrder::Rgb);
        &self.buf
    }

    /// Encodes the frame as a baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> anyhow::Result<Vec<u8>> {
        let rgb = self.to_rgb();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality).encode(
            rgb.buf.as_raw(),
            rgb.width(),
            rgb.height(),
            ColorType::Rgb8,
        )?;
        Ok(out)
    }

    /// Saves the frame to the file system.
    ///
    /// The path must have a supported file extension (`jpeg`, `jpg` or `png`).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        self.save_impl(path.as_ref())
    }

    fn save_impl(&self, path: &Path) -> anyhow::Result<()> {
        let format = ImageFormat::from_path(path)?;
        let rgb = self.to_rgb();
        rgb.buf.save_with_format(path, format.to_image_format())?;
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {:?} Frame", self.width(), self.height(), self.order)
    }
}
