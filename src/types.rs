use std::{fmt, time::Duration};

use crate::error::FrameError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Color,
    Depth,
    Ir,
}

impl StreamKind {
    pub fn view_name(&self) -> &'static str {
        match self {
            StreamKind::Color => "Color Stream",
            StreamKind::Depth => "Depth Stream",
            StreamKind::Ir => "IR Stream",
        }
    }

    pub fn sensor_label(&self) -> &'static str {
        match self {
            StreamKind::Color => "SENSOR_COLOR",
            StreamKind::Depth => "SENSOR_DEPTH",
            StreamKind::Ir => "SENSOR_IR",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Color => f.write_str("color"),
            StreamKind::Depth => f.write_str("depth"),
            StreamKind::Ir => f.write_str("IR"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Depth1Mm,
    Depth100Um,
    Shift9_2,
    Shift9_3,
    Rgb888,
    Bgr888,
    Yuv422,
    Yuyv,
    Nv12,
    Gray8,
    Gray16,
    Jpeg,
}

impl PixelFormat {
    pub fn label(&self) -> &'static str {
        match self {
            PixelFormat::Depth1Mm => "PIXEL_FORMAT_DEPTH_1_MM",
            PixelFormat::Depth100Um => "PIXEL_FORMAT_DEPTH_100_UM",
            PixelFormat::Shift9_2 => "PIXEL_FORMAT_SHIFT_9_2",
            PixelFormat::Shift9_3 => "PIXEL_FORMAT_SHIFT_9_3",
            PixelFormat::Rgb888 => "PIXEL_FORMAT_RGB888",
            PixelFormat::Bgr888 => "PIXEL_FORMAT_BGR888",
            PixelFormat::Yuv422 => "PIXEL_FORMAT_YUV422",
            PixelFormat::Yuyv => "PIXEL_FORMAT_YUYV",
            PixelFormat::Nv12 => "PIXEL_FORMAT_NV12",
            PixelFormat::Gray8 => "PIXEL_FORMAT_GRAY8",
            PixelFormat::Gray16 => "PIXEL_FORMAT_GRAY16",
            PixelFormat::Jpeg => "PIXEL_FORMAT_JPEG",
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            PixelFormat::Depth1Mm
                | PixelFormat::Depth100Um
                | PixelFormat::Shift9_2
                | PixelFormat::Shift9_3
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl VideoMode {
    pub const fn new(width: u32, height: u32, fps: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            format,
        }
    }

    pub fn is_vga(&self) -> bool {
        self.width == 640 && self.height == 480
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}fps {}",
            self.width,
            self.height,
            self.fps,
            self.format.label()
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A frame exactly as a capture backend delivered it.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub timestamp: Duration,
    pub index: u64,
}

impl RawFrame {
    /// Packs millimeter samples as little-endian `Depth1Mm` bytes.
    pub fn from_depth_mm(width: u32, height: u32, samples: &[u16], index: u64) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            kind: StreamKind::Depth,
            width,
            height,
            format: PixelFormat::Depth1Mm,
            data,
            timestamp: Duration::ZERO,
            index,
        }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<u16>,
    pub timestamp: Duration,
    pub index: u64,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, samples: Vec<u16>) -> Result<Self, FrameError> {
        let expected = (width as usize).saturating_mul(height as usize);
        if samples.len() != expected {
            return Err(FrameError::SizeMismatch {
                what: "depth",
                got: samples.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            samples,
            timestamp: Duration::ZERO,
            index: 0,
        })
    }

    /// Validates and reinterprets a raw depth buffer as millimeters.
    pub fn from_raw(frame: &RawFrame) -> Result<Self, FrameError> {
        let divisor = match frame.format {
            PixelFormat::Depth1Mm => 1,
            PixelFormat::Depth100Um => 10,
            other => return Err(FrameError::UnsupportedFormat(other)),
        };
        let expected = frame.pixel_count().saturating_mul(2);
        if frame.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                what: "depth",
                got: frame.data.len(),
                expected,
            });
        }

        let samples = frame
            .data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) / divisor)
            .collect();

        Ok(Self {
            width: frame.width,
            height: frame.height,
            samples,
            timestamp: frame.timestamp,
            index: frame.index,
        })
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.samples
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn center_distance(&self) -> Option<u16> {
        self.get(self.width / 2, self.height / 2)
    }
}

pub type UserId = u16;
pub type HandId = u16;

/// Per-pixel user ids, 0 meaning background.
#[derive(Clone, Debug, PartialEq)]
pub struct UserLabelMap {
    width: u32,
    height: u32,
    labels: Vec<UserId>,
}

impl UserLabelMap {
    pub fn new(width: u32, height: u32, labels: Vec<UserId>) -> Result<Self, FrameError> {
        let expected = (width as usize).saturating_mul(height as usize);
        if labels.len() != expected {
            return Err(FrameError::SizeMismatch {
                what: "user map",
                got: labels.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn labels(&self) -> &[UserId] {
        &self.labels
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingState {
    New,
    Tracked,
    Lost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointKind {
    Head,
    Neck,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftHand,
    RightHand,
    Torso,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftFoot,
    RightFoot,
}

impl JointKind {
    pub const ALL: [JointKind; 15] = [
        JointKind::Head,
        JointKind::Neck,
        JointKind::LeftShoulder,
        JointKind::RightShoulder,
        JointKind::LeftElbow,
        JointKind::RightElbow,
        JointKind::LeftHand,
        JointKind::RightHand,
        JointKind::Torso,
        JointKind::LeftHip,
        JointKind::RightHip,
        JointKind::LeftKnee,
        JointKind::RightKnee,
        JointKind::LeftFoot,
        JointKind::RightFoot,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Joint {
    pub kind: JointKind,
    pub position: Point3,
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkeletonState {
    None,
    Calibrating,
    Tracked,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Skeleton {
    pub state: SkeletonState,
    pub joints: Vec<Joint>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: UserId,
    pub state: TrackingState,
    pub center_of_mass: Point3,
    pub skeleton: Option<Skeleton>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hand {
    pub id: HandId,
    pub state: TrackingState,
    pub position: Point3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Wave,
    Click,
    HandRaise,
}

impl GestureKind {
    pub fn label(&self) -> &'static str {
        match self {
            GestureKind::Wave => "WAVE",
            GestureKind::Click => "CLICK",
            GestureKind::HandRaise => "HAND RAISE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureData {
    pub kind: GestureKind,
    pub position: Point3,
    pub complete: bool,
}

/// One tracker snapshot. Entity lifecycles belong to the tracker.
#[derive(Clone, Debug)]
pub struct TrackingFrame {
    pub index: u64,
    pub depth: DepthFrame,
    pub user_map: Option<UserLabelMap>,
    pub users: Vec<User>,
    pub hands: Vec<Hand>,
    pub gestures: Vec<GestureData>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackerEvent {
    GestureCompleted {
        gesture: GestureKind,
        position: Point3,
    },
    Grab {
        hand: HandId,
    },
    Release {
        hand: HandId,
    },
    UserLost {
        user: UserId,
    },
    HandLost {
        hand: HandId,
    },
}

impl TrackerEvent {
    /// Text shown by the overlay, if this event is worth a caption.
    pub fn caption(&self) -> Option<&'static str> {
        match self {
            TrackerEvent::GestureCompleted { gesture, .. } => Some(gesture.label()),
            TrackerEvent::Grab { .. } => Some("GRAB"),
            TrackerEvent::Release { .. } => Some("RELEASE"),
            TrackerEvent::UserLost { .. } | TrackerEvent::HandLost { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_view_validates_length() {
        let mut frame = RawFrame::from_depth_mm(2, 2, &[1, 2, 3, 4], 7);
        frame.data.pop();
        assert_eq!(
            DepthFrame::from_raw(&frame),
            Err(FrameError::SizeMismatch {
                what: "depth",
                got: 7,
                expected: 8
            })
        );
    }

    #[test]
    fn depth_view_reads_little_endian_millimeters() {
        let frame = RawFrame::from_depth_mm(2, 1, &[1500, 65535], 3);
        let depth = DepthFrame::from_raw(&frame).unwrap();
        assert_eq!(depth.samples, vec![1500, 65535]);
        assert_eq!(depth.index, 3);
        assert_eq!(depth.get(1, 0), Some(65535));
        assert_eq!(depth.get(2, 0), None);
    }

    #[test]
    fn depth_view_converts_100um_units() {
        let mut frame = RawFrame::from_depth_mm(1, 1, &[12345], 0);
        frame.format = PixelFormat::Depth100Um;
        let depth = DepthFrame::from_raw(&frame).unwrap();
        assert_eq!(depth.samples, vec![1234]);
    }

    #[test]
    fn depth_view_rejects_shift_formats() {
        let mut frame = RawFrame::from_depth_mm(1, 1, &[0], 0);
        frame.format = PixelFormat::Shift9_2;
        assert_eq!(
            DepthFrame::from_raw(&frame),
            Err(FrameError::UnsupportedFormat(PixelFormat::Shift9_2))
        );
    }

    #[test]
    fn center_distance_uses_integer_center() {
        let depth = DepthFrame::new(3, 3, (0..9).collect()).unwrap();
        assert_eq!(depth.center_distance(), Some(4));
    }

    #[test]
    fn user_map_validates_length() {
        assert!(UserLabelMap::new(2, 2, vec![0; 4]).is_ok());
        assert!(UserLabelMap::new(2, 2, vec![0; 5]).is_err());
    }

    #[test]
    fn only_gestures_and_grabs_have_captions() {
        let wave = TrackerEvent::GestureCompleted {
            gesture: GestureKind::Wave,
            position: Point3::default(),
        };
        assert_eq!(wave.caption(), Some("WAVE"));
        assert_eq!(TrackerEvent::Release { hand: 1 }.caption(), Some("RELEASE"));
        assert_eq!(TrackerEvent::HandLost { hand: 1 }.caption(), None);
    }
}
