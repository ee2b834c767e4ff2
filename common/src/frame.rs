use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// Opaque identifier of the on-screen window being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Pixel layout of a captured frame.
///
/// The diff never looks at channel boundaries; the format only decides the
/// bytes-per-pixel used for stride arithmetic and how a decoded image is
/// repacked by a frame source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, unused (always 0xFF).
    #[default]
    Bgr32,
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra32,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb24,
    /// 1 byte per pixel luma.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr32 | PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Smallest legal stride for a row of `width` pixels.
    pub fn min_stride(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }

    /// Row stride padded to a 4-byte boundary, as bitmap surfaces lay rows out.
    pub fn aligned_stride(self, width: u32) -> usize {
        (self.min_stride(width) + 3) & !3
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Bgr32 => "bgr32",
            PixelFormat::Bgra32 => "bgra32",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray8 => "gray8",
        }
    }

    /// Repack a tightly packed RGBA8 image into this layout with rows of
    /// `stride` bytes. Padding bytes at the end of each row are zero.
    pub fn repack_rgba(
        self,
        rgba: &[u8],
        width: u32,
        height: u32,
        stride: usize,
    ) -> Result<Vec<u8>, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyGeometry { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(FrameError::PayloadSize {
                got: rgba.len(),
                expected,
            });
        }
        let min = self.min_stride(width);
        if stride < min {
            return Err(FrameError::StrideTooSmall { stride, min });
        }

        let mut out = vec![0u8; stride * height as usize];
        let bpp = self.bytes_per_pixel();
        for (row_in, row_out) in rgba
            .chunks_exact(width as usize * 4)
            .zip(out.chunks_exact_mut(stride))
        {
            for (px, dst) in row_in.chunks_exact(4).zip(row_out.chunks_exact_mut(bpp)) {
                let (r, g, b, a) = (px[0], px[1], px[2], px[3]);
                match self {
                    PixelFormat::Bgr32 => dst.copy_from_slice(&[b, g, r, 0xFF]),
                    PixelFormat::Bgra32 => dst.copy_from_slice(&[b, g, r, a]),
                    PixelFormat::Rgb24 => dst.copy_from_slice(&[r, g, b]),
                    PixelFormat::Gray8 => {
                        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
                        dst[0] = luma as u8;
                    }
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Width and height of a frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One captured snapshot of a window's pixels.
///
/// The payload is reference counted, so cloning a frame out of a history
/// buffer never copies pixels.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Bytes,
    captured_at: DateTime<Utc>,
}

impl FrameBuffer {
    /// Build a frame, checking that `stride` fits `width` pixels of `format`
    /// and that the payload is exactly `stride * height` bytes.
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyGeometry { width, height });
        }
        let min = format.min_stride(width);
        if stride < min {
            return Err(FrameError::StrideTooSmall { stride, min });
        }
        let data = data.into();
        let expected = stride * height as usize;
        if data.len() != expected {
            return Err(FrameError::PayloadSize {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
            captured_at: Utc::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            width: self.width,
            height: self.height,
        }
    }

    /// Payload length in bytes (`stride * height`).
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Byte-wise absolute difference between two frames of identical geometry.
///
/// Carries no geometry of its own; read it with the detector's fixed
/// width, height and stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFrame {
    data: Bytes,
    captured_at: DateTime<Utc>,
}

impl DiffFrame {
    /// `captured_at` is the capture time of the newer of the two frames.
    pub fn new(data: impl Into<Bytes>, captured_at: DateTime<Utc>) -> Self {
        Self {
            data: data.into(),
            captured_at,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when every byte is zero: nothing changed between the frames.
    pub fn is_unchanged(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame has empty geometry {width}x{height}")]
    EmptyGeometry { width: u32, height: u32 },
    #[error("stride {stride} is smaller than the minimum row size {min}")]
    StrideTooSmall { stride: usize, min: usize },
    #[error("frame payload is {got} bytes, expected {expected}")]
    PayloadSize { got: usize, expected: usize },
}
