use thiserror::Error;

use crate::types::{PixelFormat, StreamKind, UserId};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to start {kind} stream: {reason}")]
    StreamStartFailure { kind: StreamKind, reason: String },
    #[error("frame read failed: {0}")]
    FrameReadFailure(String),
    #[error("unknown stream handle {0}")]
    UnknownStream(usize),
    #[error("{0} is not supported by this device")]
    Unsupported(&'static str),
    #[error("stream disconnected")]
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("{what} buffer size mismatch: got {got}, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    #[error("pixel format {0:?} cannot be used here")]
    UnsupportedFormat(PixelFormat),
    #[error("frame dimensions differ: {0}x{1} vs {2}x{3}")]
    DimensionMismatch(u32, u32, u32, u32),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("resize failed: {0}")]
    Resize(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("point ({x:.1}, {y:.1}, {z:.1}) lies behind the sensor")]
    BehindSensor { x: f32, y: f32, z: f32 },
    #[error("projected point ({px:.1}, {py:.1}) is outside the {width}x{height} frame")]
    OutOfFrame {
        px: f32,
        py: f32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackingError {
    #[error("no user with id {0}")]
    UnknownUser(UserId),
    #[error("no hand near ({x:.0}, {y:.0}, {z:.0})")]
    NoHandAt { x: f32, y: f32, z: f32 },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error("giving up after {0} consecutive frame failures")]
    TooManyFailures(u32),
    #[error("viewer closed")]
    ViewerClosed,
    #[error("sink failed: {0}")]
    Sink(String),
}

impl PipelineError {
    /// Startup failures abort a sample; everything else only costs a tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Capture(CaptureError::DeviceUnavailable(_))
                | PipelineError::Capture(CaptureError::StreamStartFailure { .. })
                | PipelineError::TooManyFailures(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_failures_are_fatal() {
        let err = PipelineError::from(CaptureError::DeviceUnavailable("none".into()));
        assert!(err.is_fatal());
        let err = PipelineError::from(CaptureError::StreamStartFailure {
            kind: StreamKind::Depth,
            reason: "busy".into(),
        });
        assert!(err.is_fatal());
    }

    #[test]
    fn steady_state_failures_are_transient() {
        let err = PipelineError::from(CaptureError::FrameReadFailure("timeout".into()));
        assert!(!err.is_fatal());
        let err = PipelineError::from(FrameError::SizeMismatch {
            what: "depth",
            got: 3,
            expected: 8,
        });
        assert!(!err.is_fatal());
    }

    #[test]
    fn messages_name_the_stream() {
        let err = CaptureError::StreamStartFailure {
            kind: StreamKind::Ir,
            reason: "no sensor".into(),
        };
        assert_eq!(err.to_string(), "failed to start IR stream: no sensor");
    }
}
