use window_delta_detector::DetectorError;

/// What a single diff frame says about the watched window.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffSummary {
    /// Bytes whose delta is above the change threshold.
    pub changed_bytes: usize,
    pub total_bytes: usize,
    pub max_delta: u8,
    pub mean_delta: f64,
    /// First and last pixel row containing a changed byte.
    pub changed_rows: Option<(usize, usize)>,
}

impl DiffSummary {
    /// Summarise `diff`, laid out in rows of `stride` bytes. A byte counts as
    /// changed when its delta is strictly above `threshold`.
    pub fn compute(diff: &[u8], stride: usize, threshold: u8) -> Self {
        let mut changed_bytes = 0;
        let mut max_delta = 0u8;
        let mut sum: u64 = 0;
        let mut changed_rows: Option<(usize, usize)> = None;

        for (row, bytes) in diff.chunks(stride.max(1)).enumerate() {
            let mut row_changed = false;
            for &b in bytes {
                sum += b as u64;
                max_delta = max_delta.max(b);
                if b > threshold {
                    changed_bytes += 1;
                    row_changed = true;
                }
            }
            if row_changed {
                changed_rows = Some(match changed_rows {
                    Some((first, _)) => (first, row),
                    None => (row, row),
                });
            }
        }

        let mean_delta = if diff.is_empty() {
            0.0
        } else {
            sum as f64 / diff.len() as f64
        };

        Self {
            changed_bytes,
            total_bytes: diff.len(),
            max_delta,
            mean_delta,
            changed_rows,
        }
    }

    pub fn is_changed(&self) -> bool {
        self.changed_bytes > 0
    }

    pub fn changed_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.changed_bytes as f64 / self.total_bytes as f64
    }
}

/// Message shown to the user when the detector gives up.
pub fn fault_message(err: &DetectorError) -> String {
    match err {
        DetectorError::FrameSizeChanged { expected, actual } => format!(
            "do not resize the captured window (was {expected}, now {actual}); restart to capture it at the new size"
        ),
        DetectorError::InvalidHandle { handle, .. } => {
            format!("the captured window {handle} no longer exists")
        }
        other => format!("capture stopped: {other}"),
    }
}
