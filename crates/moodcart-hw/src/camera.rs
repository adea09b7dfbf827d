//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::io;
use std::ops::ControlFlow;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera access denied: {0}")]
    AccessDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

impl CameraError {
    /// Whether the camera could not be acquired at all (permission or availability).
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            CameraError::AccessDenied(_) | CameraError::DeviceNotFound(_) | CameraError::DeviceBusy
        )
    }
}

/// Which way the requested camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

/// Requested stream properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    /// Target frame rate; drivers may deliver less.
    pub fps: u32,
    pub facing: Facing,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            facing: Facing::User,
        }
    }
}

/// A live stream of frames.
pub trait FrameSource: Send {
    /// Pump frames into `sink` until it returns `Break` or capture fails.
    fn run(&mut self, sink: &mut dyn FnMut(Frame) -> ControlFlow<()>) -> Result<(), CameraError>;
}

/// Something that can hand out a [`FrameSource`] for the given constraints.
pub trait CameraProvider: Send + Sync {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Opens a fixed V4L2 device node.
///
/// V4L2 has no notion of facing; the configured node is expected to be the
/// user-facing webcam.
#[derive(Debug, Clone)]
pub struct V4lProvider {
    device_path: String,
}

impl V4lProvider {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }
}

impl CameraProvider for V4lProvider {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.device_path, constraints)?;
        Ok(Box::new(camera))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") {
            Some(PixelFormat::Y16)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle. Dropping it releases the device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device and negotiate the requested geometry and rate.
    pub fn open(device_path: &str, constraints: &CaptureConstraints) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| map_open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        // Frame rate is a target; a driver refusing it is not fatal.
        if let Err(e) = device.set_params(&Parameters::with_fps(constraints.fps)) {
            tracing::warn!(fps = constraints.fps, error = %e, "could not set frame rate");
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            fps = constraints.fps,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Capture a single frame. Used for diagnostics; live capture goes
    /// through [`FrameSource::run`].
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let gray = self.buf_to_grayscale(buf)?;
        Frame::from_gray(gray, self.width, self.height, meta.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let converted = match self.pixel_format {
            PixelFormat::Grey if buf.len() >= pixels => Ok(buf[..pixels].to_vec()),
            PixelFormat::Grey => Err(frame::FrameError::InvalidLength {
                expected: pixels,
                actual: buf.len(),
            }),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps
                    .capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn run(&mut self, sink: &mut dyn FnMut(Frame) -> ControlFlow<()>) -> Result<(), CameraError> {
        let mut stream = self.stream()?;
        loop {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let gray = self.buf_to_grayscale(buf)?;
            let frame = Frame::from_gray(gray, self.width, self.height, meta.sequence)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
            if sink(frame).is_break() {
                tracing::debug!(device = %self.device_path, "capture loop released");
                return Ok(());
            }
        }
    }
}

fn map_open_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::AccessDenied(format!("{device_path}: {e}")),
        io::ErrorKind::NotFound => CameraError::DeviceNotFound(device_path.to_string()),
        _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let c = CaptureConstraints::default();
        assert_eq!((c.width, c.height, c.fps), (640, 480, 30));
        assert_eq!(c.facing, Facing::User);
    }

    #[test]
    fn test_open_error_mapping() {
        let denied =
            map_open_error("/dev/video0", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, CameraError::AccessDenied(_)));
        assert!(denied.is_acquisition_failure());

        let busy = map_open_error("/dev/video0", io::Error::from_raw_os_error(16));
        assert!(matches!(busy, CameraError::DeviceBusy));

        let missing = map_open_error("/dev/video9", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_capture_failure_is_not_acquisition_failure() {
        assert!(!CameraError::CaptureFailed("eof".into()).is_acquisition_failure());
    }

    #[test]
    fn test_missing_device_node() {
        let result = Camera::open("/dev/moodcart-does-not-exist", &CaptureConstraints::default());
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }
}
