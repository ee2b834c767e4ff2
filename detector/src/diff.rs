use window_delta_common::frame::{DiffFrame, FrameBuffer};

/// Flat byte-wise absolute difference between two frames.
///
/// Channel boundaries and row padding are not interpreted: every byte of
/// the payload, padding included, is compared on its own.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    frame_size: usize,
}

impl DiffEngine {
    /// `frame_size` is the declared payload size both inputs must match.
    pub fn new(frame_size: usize) -> Self {
        Self { frame_size }
    }

    /// Diff `older` against `newer`. The result is stamped with the newer
    /// frame's capture time.
    pub fn diff(&self, older: &FrameBuffer, newer: &FrameBuffer) -> Result<DiffFrame, DiffError> {
        let data = self.diff_bytes(older.data(), newer.data())?;
        Ok(DiffFrame::new(data, newer.captured_at()))
    }

    pub fn diff_bytes(&self, a: &[u8], b: &[u8]) -> Result<Vec<u8>, DiffError> {
        if a.len() != self.frame_size || b.len() != self.frame_size {
            return Err(DiffError::LengthMismatch {
                expected: self.frame_size,
                left: a.len(),
                right: b.len(),
            });
        }
        Ok(a.iter().zip(b).map(|(&x, &y)| x.abs_diff(y)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error("cannot diff frames of {left} and {right} bytes, expected {expected}")]
    LengthMismatch {
        expected: usize,
        left: usize,
        right: usize,
    },
}
