use image::ImageReader;
use reqwest::StatusCode;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, warn};
use window_delta_common::config::SourceConfig;
use window_delta_common::frame::{FrameBuffer, PixelFormat, WindowHandle};

use super::{CaptureError, FrameSource};

/// Captures windows through an HTTP capture bridge.
///
/// The bridge runs next to the desktop session and serves the current
/// content of a window as an encoded image (PNG, JPEG or BMP) at
/// `{base_url}/windows/{handle}/frame`. A 404 or 410 means the window is
/// gone. Decoded pixels are repacked into the requested format with rows
/// padded to a 4-byte stride.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, CaptureError> {
        Self::new(config.base_url.clone(), config.request_timeout())
    }

    pub fn frame_url(&self, handle: WindowHandle) -> String {
        format!("{}/windows/{}/frame", self.base_url, handle.0)
    }
}

impl FrameSource for HttpSnapshotSource {
    async fn capture(
        &mut self,
        handle: WindowHandle,
        format: PixelFormat,
    ) -> Result<FrameBuffer, CaptureError> {
        let url = self.frame_url(handle);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                warn!(%handle, url, "capture bridge reports window is gone");
                return Err(CaptureError::InvalidHandle(handle));
            }
            status if !status.is_success() => {
                return Err(CaptureError::Backend(format!(
                    "HTTP status {}",
                    status.as_u16()
                )));
            }
            _ => {}
        }

        let encoded = response
            .bytes()
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        debug!(%handle, bytes = encoded.len(), "fetched window snapshot");
        decode_frame(&encoded, format)
    }
}

/// Decode an encoded image into a frame of `format`.
pub fn decode_frame(encoded: &[u8], format: PixelFormat) -> Result<FrameBuffer, CaptureError> {
    let img = ImageReader::new(Cursor::new(encoded))
        .with_guessed_format()
        .map_err(|e| CaptureError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| CaptureError::Decode(e.to_string()))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let stride = format.aligned_stride(width);
    let data = format.repack_rgba(rgba.as_raw(), width, height, stride)?;
    Ok(FrameBuffer::new(width, height, stride, format, data)?)
}
