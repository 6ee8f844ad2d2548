use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_MAX_RANGE_MM: u16 = 10_000;
pub const DEFAULT_FPS: u32 = 30;
pub const DISPLAY_SIZE: (u32, u32) = (640, 480);

/// How a depth sample of 0 (no return) is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroDepthPolicy {
    /// Treat as maximum distance: darkest.
    #[default]
    Far,
    /// Run through the inverted arithmetic: brightest.
    Near,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMapping {
    /// Closer is brighter.
    Inverted,
    /// Farther is brighter, no-return stays black.
    Linear,
}

/// Palette lookup for user labels beyond the palette size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteOverflow {
    #[default]
    Wrap,
    Clamp,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DepthSettings {
    /// Overrides the sample's own range when set.
    pub max_range_mm: Option<u16>,
    pub zero_depth: ZeroDepthPolicy,
    /// Overrides the sample's own mapping when set.
    pub mapping: Option<DepthMapping>,
}

impl Default for DepthSettings {
    fn default() -> Self {
        Self {
            max_range_mm: None,
            zero_depth: ZeroDepthPolicy::Far,
            mapping: None,
        }
    }
}

/// Immutable overlay styling handed to the compositor.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Per-channel RGB multipliers applied to labelled user pixels.
    pub palette: Vec<[f32; 3]>,
    pub palette_overflow: PaletteOverflow,
    pub joint_confidence_threshold: f32,
    pub joint_radius: i32,
    pub joint_color: [u8; 4],
    pub trail_length: usize,
    pub trail_thickness: i32,
    pub trail_color: [u8; 4],
    pub hand_marker_radius: i32,
    pub hand_marker_color: [u8; 4],
    pub label_origin: (i32, i32),
    pub label_scale: i32,
    pub label_color: [u8; 4],
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            palette: vec![
                [1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 0.0],
                [0.0, 0.0, 0.5],
                [0.0, 0.5, 0.0],
                [0.5, 0.0, 0.0],
                [0.0, 0.5, 0.5],
            ],
            palette_overflow: PaletteOverflow::Wrap,
            joint_confidence_threshold: 0.7,
            joint_radius: 5,
            joint_color: [255, 0, 0, 255],
            trail_length: 30,
            trail_thickness: 3,
            trail_color: [0, 255, 0, 255],
            hand_marker_radius: 3,
            hand_marker_color: [0, 255, 0, 255],
            // Glyph top-left; with scale 3 the baseline lands at y = 51.
            label_origin: (0, 30),
            label_scale: 3,
            label_color: [0, 0, 255, 255],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub fps: u32,
    pub wait_timeout_ms: u64,
    /// 0 disables the limit.
    pub max_consecutive_failures: u32,
    pub synthetic_devices: usize,
    /// Frames kept per stream before the producer starts dropping.
    pub queue_depth: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            wait_timeout_ms: 100,
            max_consecutive_failures: 3,
            synthetic_devices: 1,
            queue_depth: 1,
        }
    }
}

impl CaptureSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Presentation size; `None` keeps the source resolution.
    pub target_size: Option<(u32, u32)>,
    /// Headless sink writes every n-th frame per view.
    pub snapshot_every: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            target_size: Some(DISPLAY_SIZE),
            snapshot_every: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub depth: DepthSettings,
    pub overlay: OverlayStyle,
    pub capture: CaptureSettings,
    pub display: DisplaySettings,
}

impl VisualizerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth.max_range_mm == Some(0) {
            bail!("depth.max_range_mm must be positive");
        }
        if self.overlay.palette.is_empty() {
            bail!("overlay.palette must have at least one color");
        }
        if self.overlay.trail_length == 0 {
            bail!("overlay.trail_length must be positive");
        }
        if !(0.0..=1.0).contains(&self.overlay.joint_confidence_threshold) {
            bail!("overlay.joint_confidence_threshold must be within [0, 1]");
        }
        if self.capture.fps == 0 {
            bail!("capture.fps must be positive");
        }
        if self.capture.queue_depth == 0 {
            bail!("capture.queue_depth must be positive");
        }
        if let Some((w, h)) = self.display.target_size {
            if w == 0 || h == 0 {
                bail!("display.target_size must be non-empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_samples() {
        let config = VisualizerConfig::default();
        assert_eq!(config.depth.zero_depth, ZeroDepthPolicy::Far);
        assert_eq!(config.overlay.joint_confidence_threshold, 0.7);
        assert_eq!(config.overlay.joint_radius, 5);
        assert_eq!(config.overlay.trail_length, 30);
        assert_eq!(config.overlay.palette.len(), 10);
        assert_eq!(config.overlay.palette_overflow, PaletteOverflow::Wrap);
        assert_eq!(config.display.target_size, Some((640, 480)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = VisualizerConfig::from_json(
            r#"{
                "depth": { "max_range_mm": 4000, "zero_depth": "near" },
                "overlay": { "palette_overflow": "clamp", "trail_length": 10 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.depth.max_range_mm, Some(4000));
        assert_eq!(config.depth.zero_depth, ZeroDepthPolicy::Near);
        assert_eq!(config.depth.mapping, None);
        assert_eq!(config.overlay.palette_overflow, PaletteOverflow::Clamp);
        assert_eq!(config.overlay.trail_length, 10);
        assert_eq!(config.overlay.joint_radius, 5);
        assert_eq!(config.capture.fps, DEFAULT_FPS);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(VisualizerConfig::from_json(r#"{"depth": {"max_range_mm": 0}}"#).is_err());
        assert!(VisualizerConfig::from_json(r#"{"overlay": {"palette": []}}"#).is_err());
        assert!(VisualizerConfig::from_json(r#"{"capture": {"fps": 0}}"#).is_err());
        assert!(VisualizerConfig::from_json(r#"{"depth": {"mapping": "sideways"}}"#).is_err());
    }
}
