pub mod buffer;
pub mod compositor;
pub mod depth_converter;
pub mod draw;
pub mod pump;
pub mod resize;
pub mod rgba_converter;
pub mod sink;
pub mod trail;

// Re-exports for convenience
pub use buffer::{ColorModel, VisualBuffer};
pub use compositor::{Compositor, OverlayLayers, Projector};
pub use depth_converter::{DepthConverter, invert_scale};
pub use pump::{
    FramePump, PumpCommand, PumpControl, PumpOptions, PumpState, PumpStats, StreamView,
    TrackingSession,
};
pub use resize::DisplayScaler;
pub use sink::{ChannelSink, FrameSink, PngSink, PresentedFrame};
