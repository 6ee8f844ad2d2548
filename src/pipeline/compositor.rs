//! Tracking overlays drawn on top of a converted depth image.

use std::collections::HashMap;

use super::{
    buffer::{ColorModel, VisualBuffer},
    draw::{draw_disc, draw_line, draw_text},
    trail::Trail,
};
use crate::{
    config::{OverlayStyle, PaletteOverflow},
    error::{FrameError, ProjectionError},
    types::{
        DepthFrame, Hand, HandId, Point3, SkeletonState, TrackerEvent, TrackingFrame,
        TrackingState, User, UserId, UserLabelMap,
    },
};

/// Real-world to image-space mapping supplied by the tracker.
pub trait Projector {
    fn project(&self, point: Point3) -> Result<(f32, f32), ProjectionError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayLayers {
    pub user_labels: bool,
    pub skeletons: bool,
    pub hand_trails: bool,
    pub hand_markers: bool,
    pub caption: bool,
    pub center_distance: bool,
}

pub struct Compositor {
    style: OverlayStyle,
    trails: HashMap<HandId, Trail>,
    caption: Option<String>,
    skipped_elements: u64,
}

impl Compositor {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            trails: HashMap::new(),
            caption: None,
            skipped_elements: 0,
        }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn trail(&self, hand: HandId) -> Option<&Trail> {
        self.trails.get(&hand)
    }

    /// Overlay elements dropped because their projection failed.
    pub fn skipped_elements(&self) -> u64 {
        self.skipped_elements
    }

    pub fn compose(
        &mut self,
        buffer: &mut VisualBuffer,
        frame: &TrackingFrame,
        projector: &dyn Projector,
        layers: OverlayLayers,
    ) -> Result<(), FrameError> {
        if layers.user_labels {
            if let Some(map) = &frame.user_map {
                self.apply_user_labels(buffer, map)?;
            }
        }
        if layers.skeletons {
            self.draw_skeletons(buffer, &frame.users, projector);
        }
        if layers.hand_trails {
            self.update_trails(&frame.hands);
            self.draw_trails(buffer, projector);
        }
        if layers.hand_markers {
            self.draw_hand_markers(buffer, &frame.hands, projector);
        }
        if layers.center_distance {
            self.draw_center_distance(buffer, &frame.depth);
        }
        if layers.caption {
            self.draw_caption(buffer);
        }
        Ok(())
    }

    pub fn palette_color(&self, label: UserId) -> [f32; 3] {
        let palette = &self.style.palette;
        if palette.is_empty() {
            return [1.0, 1.0, 1.0];
        }
        let slot = label.saturating_sub(1) as usize;
        let idx = match self.style.palette_overflow {
            PaletteOverflow::Wrap => slot % palette.len(),
            PaletteOverflow::Clamp => slot.min(palette.len() - 1),
        };
        palette[idx]
    }

    /// Scales the gray of every labelled pixel by its user's palette color.
    pub fn apply_user_labels(
        &self,
        buffer: &mut VisualBuffer,
        map: &UserLabelMap,
    ) -> Result<(), FrameError> {
        if map.width() != buffer.width() || map.height() != buffer.height() {
            return Err(FrameError::DimensionMismatch(
                map.width(),
                map.height(),
                buffer.width(),
                buffer.height(),
            ));
        }

        let model = buffer.model();
        let channels = buffer.channels();
        let bytes = buffer.as_bytes_mut();
        for (i, &label) in map.labels().iter().enumerate() {
            if label == 0 {
                continue;
            }
            let factor = self.palette_color(label);
            let px = &mut bytes[i * channels..(i + 1) * channels];
            match model {
                ColorModel::Gray => {
                    let mean = (factor[0] + factor[1] + factor[2]) / 3.0;
                    px[0] = tint(px[0], mean);
                }
                ColorModel::Rgb | ColorModel::Rgba => {
                    for c in 0..3 {
                        px[c] = tint(px[c], factor[c]);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn draw_skeletons(
        &mut self,
        buffer: &mut VisualBuffer,
        users: &[User],
        projector: &dyn Projector,
    ) {
        for user in users {
            if user.state != TrackingState::Tracked {
                continue;
            }
            let Some(skeleton) = &user.skeleton else {
                continue;
            };
            if skeleton.state != SkeletonState::Tracked {
                continue;
            }

            for joint in &skeleton.joints {
                if joint.confidence < self.style.joint_confidence_threshold {
                    continue;
                }
                let Some(center) = self.project_into(buffer, projector, joint.position) else {
                    continue;
                };
                draw_disc(
                    buffer,
                    center,
                    self.style.joint_radius,
                    self.style.joint_color,
                );
            }
        }
    }

    /// Appends tracked hand positions and forgets hands that are gone.
    pub fn update_trails(&mut self, hands: &[Hand]) {
        let capacity = self.style.trail_length;
        self.trails.retain(|id, _| {
            hands
                .iter()
                .any(|hand| hand.id == *id && hand.state != TrackingState::Lost)
        });

        for hand in hands {
            if hand.state == TrackingState::Lost {
                continue;
            }
            self.trails
                .entry(hand.id)
                .or_insert_with(|| Trail::new(capacity))
                .push(hand.position);
        }
    }

    pub fn draw_trails(&mut self, buffer: &mut VisualBuffer, projector: &dyn Projector) {
        let color = self.style.trail_color;
        let thickness = self.style.trail_thickness;
        let mut segments = Vec::new();
        let mut skipped = 0;

        for trail in self.trails.values() {
            let projected: Vec<Option<(i32, i32)>> = trail
                .iter()
                .map(|point| project_checked(buffer, projector, *point))
                .collect();
            skipped += projected.iter().filter(|p| p.is_none()).count() as u64;
            for pair in projected.windows(2) {
                if let (Some(start), Some(end)) = (pair[0], pair[1]) {
                    segments.push((start, end));
                }
            }
        }

        self.skipped_elements += skipped;
        for (start, end) in segments {
            draw_line(buffer, start, end, color, thickness);
        }
    }

    pub fn draw_hand_markers(
        &mut self,
        buffer: &mut VisualBuffer,
        hands: &[Hand],
        projector: &dyn Projector,
    ) {
        for hand in hands {
            if hand.state == TrackingState::Lost {
                continue;
            }
            let Some(center) = self.project_into(buffer, projector, hand.position) else {
                continue;
            };
            draw_disc(
                buffer,
                center,
                self.style.hand_marker_radius,
                self.style.hand_marker_color,
            );
        }
    }

    /// Remembers the caption of the latest gesture or grab event.
    pub fn note_event(&mut self, event: &TrackerEvent) {
        if let TrackerEvent::HandLost { hand } = event {
            self.trails.remove(hand);
        }
        if let Some(caption) = event.caption() {
            self.caption = Some(caption.to_string());
        }
    }

    pub fn draw_caption(&self, buffer: &mut VisualBuffer) {
        if let Some(caption) = &self.caption {
            draw_text(
                buffer,
                caption,
                self.style.label_origin,
                self.style.label_scale,
                self.style.label_color,
            );
        }
    }

    pub fn draw_center_distance(&self, buffer: &mut VisualBuffer, depth: &DepthFrame) {
        let Some(distance) = depth.center_distance() else {
            return;
        };
        draw_text(
            buffer,
            &format!("CENTER: {distance}"),
            self.style.label_origin,
            self.style.label_scale,
            [255, 255, 255, 255],
        );
    }

    fn project_into(
        &mut self,
        buffer: &VisualBuffer,
        projector: &dyn Projector,
        point: Point3,
    ) -> Option<(i32, i32)> {
        let projected = project_checked(buffer, projector, point);
        if projected.is_none() {
            self.skipped_elements += 1;
        }
        projected
    }
}

fn project_checked(
    buffer: &VisualBuffer,
    projector: &dyn Projector,
    point: Point3,
) -> Option<(i32, i32)> {
    match projector.project(point) {
        Ok((px, py)) => {
            if !px.is_finite() || !py.is_finite() {
                return None;
            }
            let (x, y) = (px as i32, py as i32);
            if px < 0.0 || py < 0.0 || x >= buffer.width() as i32 || y >= buffer.height() as i32 {
                log::debug!("skipping overlay point outside the frame at ({px:.1}, {py:.1})");
                return None;
            }
            Some((x, y))
        }
        Err(err) => {
            log::debug!("skipping overlay element: {err}");
            None
        }
    }
}

fn tint(gray: u8, factor: f32) -> u8 {
    (gray as f32 * factor).clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GestureKind, Joint, JointKind, Skeleton};

    /// Orthographic projection: real-world x/y map straight to pixels.
    struct Identity;

    impl Projector for Identity {
        fn project(&self, point: Point3) -> Result<(f32, f32), ProjectionError> {
            if point.z <= 0.0 {
                return Err(ProjectionError::BehindSensor {
                    x: point.x,
                    y: point.y,
                    z: point.z,
                });
            }
            Ok((point.x, point.y))
        }
    }

    fn gray_buffer(width: u32, height: u32, value: u8) -> VisualBuffer {
        let mut buffer = VisualBuffer::new(width, height, ColorModel::Rgba);
        for px in buffer.as_bytes_mut().chunks_exact_mut(4) {
            px[..3].fill(value);
        }
        buffer
    }

    fn tracked_user(joints: Vec<Joint>) -> User {
        User {
            id: 1,
            state: TrackingState::Tracked,
            center_of_mass: Point3::new(10.0, 10.0, 1000.0),
            skeleton: Some(Skeleton {
                state: SkeletonState::Tracked,
                joints,
            }),
        }
    }

    fn joint(x: f32, y: f32, z: f32, confidence: f32) -> Joint {
        Joint {
            kind: JointKind::Head,
            position: Point3::new(x, y, z),
            confidence,
        }
    }

    #[test]
    fn label_overlay_only_touches_its_own_pixels() {
        let compositor = Compositor::new(OverlayStyle::default());
        let mut buffer = gray_buffer(3, 1, 200);
        let map = UserLabelMap::new(3, 1, vec![0, 1, 2]).unwrap();
        compositor.apply_user_labels(&mut buffer, &map).unwrap();

        // background untouched
        assert_eq!(buffer.pixel(0, 0), Some(&[200u8, 200, 200, 255][..]));
        // label 1: red
        assert_eq!(buffer.pixel(1, 0), Some(&[200u8, 0, 0, 255][..]));
        // label 2: blue
        assert_eq!(buffer.pixel(2, 0), Some(&[0u8, 0, 200, 255][..]));
    }

    #[test]
    fn label_overlay_rejects_mismatched_map() {
        let compositor = Compositor::new(OverlayStyle::default());
        let mut buffer = gray_buffer(2, 2, 10);
        let map = UserLabelMap::new(4, 1, vec![1; 4]).unwrap();
        assert_eq!(
            compositor.apply_user_labels(&mut buffer, &map),
            Err(FrameError::DimensionMismatch(4, 1, 2, 2))
        );
    }

    #[test]
    fn palette_wraps_or_clamps() {
        let mut style = OverlayStyle::default();
        style.palette = vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let wrap = Compositor::new(style.clone());
        assert_eq!(wrap.palette_color(1), [1.0, 0.0, 0.0]);
        assert_eq!(wrap.palette_color(2), [0.0, 1.0, 0.0]);
        assert_eq!(wrap.palette_color(3), [1.0, 0.0, 0.0]);

        style.palette_overflow = PaletteOverflow::Clamp;
        let clamp = Compositor::new(style);
        assert_eq!(clamp.palette_color(3), [0.0, 1.0, 0.0]);
        assert_eq!(clamp.palette_color(40), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn joints_below_threshold_are_not_drawn() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        let mut buffer = gray_buffer(40, 40, 0);
        let users = vec![tracked_user(vec![
            joint(10.0, 10.0, 1000.0, 0.9),
            joint(30.0, 30.0, 1000.0, 0.5),
        ])];
        compositor.draw_skeletons(&mut buffer, &users, &Identity);

        assert_eq!(buffer.pixel(10, 10).unwrap()[0], 255);
        assert_eq!(buffer.pixel(10, 15).unwrap()[0], 255);
        assert_eq!(buffer.pixel(30, 30).unwrap()[0], 0);
    }

    #[test]
    fn failed_projections_are_skipped_not_fatal() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        let mut buffer = gray_buffer(20, 20, 0);
        let users = vec![tracked_user(vec![
            joint(5.0, 5.0, -1.0, 1.0),
            joint(500.0, 5.0, 1000.0, 1.0),
            joint(10.0, 10.0, 1000.0, 1.0),
        ])];
        compositor.draw_skeletons(&mut buffer, &users, &Identity);
        assert_eq!(compositor.skipped_elements(), 2);
        assert_eq!(buffer.pixel(10, 10).unwrap()[0], 255);
    }

    #[test]
    fn new_users_get_no_skeleton() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        let mut buffer = gray_buffer(20, 20, 0);
        let mut user = tracked_user(vec![joint(10.0, 10.0, 1000.0, 1.0)]);
        user.state = TrackingState::New;
        compositor.draw_skeletons(&mut buffer, &[user], &Identity);
        assert_eq!(buffer, gray_buffer(20, 20, 0));
    }

    #[test]
    fn trails_follow_tracked_hands_and_reset_when_lost() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        for i in 0..40 {
            let hand = Hand {
                id: 7,
                state: TrackingState::Tracked,
                position: Point3::new(i as f32, 5.0, 800.0),
            };
            compositor.update_trails(&[hand]);
        }
        let trail = compositor.trail(7).unwrap();
        assert_eq!(trail.len(), 30);
        assert_eq!(trail.newest().unwrap().x, 39.0);

        let lost = Hand {
            id: 7,
            state: TrackingState::Lost,
            position: Point3::default(),
        };
        compositor.update_trails(&[lost]);
        assert!(compositor.trail(7).is_none());
    }

    #[test]
    fn trail_segments_connect_consecutive_points() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        let mut buffer = gray_buffer(40, 20, 0);
        for x in [5.0, 20.0, 35.0] {
            compositor.update_trails(&[Hand {
                id: 1,
                state: TrackingState::Tracked,
                position: Point3::new(x, 10.0, 900.0),
            }]);
        }
        compositor.draw_trails(&mut buffer, &Identity);
        for x in 5..=35 {
            assert_eq!(buffer.pixel(x, 10).unwrap()[1], 255, "x={x}");
        }
        assert_eq!(buffer.pixel(3, 10).unwrap()[1], 0);
    }

    #[test]
    fn caption_tracks_latest_event() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        assert_eq!(compositor.caption(), None);
        compositor.note_event(&TrackerEvent::GestureCompleted {
            gesture: GestureKind::Click,
            position: Point3::default(),
        });
        assert_eq!(compositor.caption(), Some("CLICK"));
        compositor.note_event(&TrackerEvent::UserLost { user: 1 });
        assert_eq!(compositor.caption(), Some("CLICK"));
        compositor.note_event(&TrackerEvent::Grab { hand: 1 });
        assert_eq!(compositor.caption(), Some("GRAB"));

        let mut buffer = gray_buffer(120, 60, 0);
        compositor.draw_caption(&mut buffer);
        assert!(
            buffer
                .as_bytes()
                .chunks_exact(4)
                .any(|px| px == [0, 0, 255, 255])
        );
    }

    #[test]
    fn compose_leaves_depth_untouched() {
        let mut compositor = Compositor::new(OverlayStyle::default());
        let depth = DepthFrame::new(4, 4, vec![1234; 16]).unwrap();
        let frame = TrackingFrame {
            index: 0,
            depth: depth.clone(),
            user_map: Some(UserLabelMap::new(4, 4, vec![1; 16]).unwrap()),
            users: Vec::new(),
            hands: Vec::new(),
            gestures: Vec::new(),
        };
        let mut buffer = gray_buffer(4, 4, 100);
        let layers = OverlayLayers {
            user_labels: true,
            skeletons: true,
            hand_trails: true,
            caption: true,
            ..Default::default()
        };
        compositor
            .compose(&mut buffer, &frame, &Identity, layers)
            .unwrap();
        assert_eq!(frame.depth, depth);
        assert_eq!(buffer.pixel(0, 0), Some(&[100u8, 0, 0, 255][..]));
    }
}
