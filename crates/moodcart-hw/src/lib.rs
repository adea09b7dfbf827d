//! moodcart-hw: Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access behind the [`CameraProvider`] /
//! [`FrameSource`] seam, plus the grayscale [`Frame`] type shared with
//! the inference side.

pub mod camera;
pub mod frame;

pub use camera::{
    Camera, CameraError, CameraProvider, CaptureConstraints, DeviceInfo, Facing, FrameSource,
    PixelFormat, V4lProvider,
};
pub use frame::{Frame, FrameError, SharedFrame};
