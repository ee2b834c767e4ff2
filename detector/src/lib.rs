//! window-delta-detector — samples a window on a fixed cadence and keeps the
//! latest byte-wise difference between consecutive captures.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource::capture ──► geometry check ──► frame history (ring, 2)
//!                                                    │ after warm-up
//!                                                    ▼
//!                          latest_diff() ◄── diff history (ring, 1) ◄── DiffEngine
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//! use window_delta_common::config::DetectorConfig;
//! use window_delta_common::frame::{PixelFormat, WindowHandle};
//! use window_delta_detector::{Detector, HttpSnapshotSource};
//!
//! let source = HttpSnapshotSource::new("http://127.0.0.1:7878", Duration::from_secs(2))?;
//! let detector = Detector::open(
//!     source,
//!     WindowHandle(0x1f04),
//!     PixelFormat::Bgr32,
//!     &DetectorConfig::default(),
//! )
//! .await?;
//! detector.start()?;
//! if let Some(diff) = detector.latest_diff()? {
//!     // diff.data(): stride * height bytes, read with detector.stride()
//! }
//! # Ok(())
//! # }
//! ```

pub mod detector;
pub mod diff;
pub mod ring;
pub mod source;

pub use detector::{Detector, DetectorError, DetectorState};
pub use diff::{DiffEngine, DiffError};
pub use ring::{RingBuffer, RingError};
pub use source::{CaptureError, FrameSource, HttpSnapshotSource};
