//! Frame type and pixel-format conversion to 8-bit grayscale.

use std::sync::Arc;
use std::time::Instant;

/// A captured grayscale camera frame.
///
/// Frames are never mutated after capture; the capture thread publishes
/// them as [`SharedFrame`] and readers only borrow the pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

/// Read-only handle to the most recent frame.
pub type SharedFrame = Arc<Frame>;

impl Frame {
    /// Build a frame from grayscale pixels, checking the buffer size.
    pub fn from_gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = (width * height) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// Pixel value at (x, y). Out-of-range coordinates are clamped to the edge.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        self.data
            .get(y * self.width as usize + x)
            .copied()
            .unwrap_or(0)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the luma bytes.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
