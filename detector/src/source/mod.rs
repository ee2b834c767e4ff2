//! Frame sources: where the detector's pixels come from.
//!
//! A source turns a window handle into a [`FrameBuffer`] in the requested
//! pixel format. The detector treats every capture error as "the window can
//! no longer be captured".

pub mod http;

use std::future::Future;

use window_delta_common::frame::{FrameBuffer, FrameError, PixelFormat, WindowHandle};

pub use http::HttpSnapshotSource;

/// Captures one frame of a window per call.
///
/// Captures are expected to be quick. The detector awaits each call on its
/// sampling task without a timeout, so a source that never resolves stalls
/// sampling for that detector.
pub trait FrameSource: Send + 'static {
    fn capture(
        &mut self,
        handle: WindowHandle,
        format: PixelFormat,
    ) -> impl Future<Output = Result<FrameBuffer, CaptureError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("window {0} does not exist or cannot be captured")]
    InvalidHandle(WindowHandle),
    #[error("capture backend failed: {0}")]
    Backend(String),
    #[error("failed to decode captured image: {0}")]
    Decode(String),
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
}
