//! Deterministic animated scene rendered by the synthetic device and
//! reported by the synthetic tracker.
//!
//! Shapes live in normalized image coordinates so every resolution sees the
//! same picture; real-world positions come from a pinhole model over the
//! sensor's field of view (x right, y up, z away from the sensor, mm).

use crate::{
    error::ProjectionError,
    pipeline::compositor::Projector,
    types::{JointKind, Point3},
};

pub const WALL_MM: u16 = 3500;
pub const BODY_MM: u16 = 2000;
pub const HAND_NEAR_MM: f32 = 1350.0;
pub const HAND_FAR_MM: f32 = 1700.0;
/// Pixels in this fraction of the left edge never return depth.
const SHADOW_FRACTION: f32 = 0.02;

pub const DEPTH_HFOV: f32 = 58.0 * std::f32::consts::PI / 180.0;
pub const DEPTH_VFOV: f32 = 45.0 * std::f32::consts::PI / 180.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pinhole {
    pub width: u32,
    pub height: u32,
    pub hfov: f32,
    pub vfov: f32,
}

impl Pinhole {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            hfov: DEPTH_HFOV,
            vfov: DEPTH_VFOV,
        }
    }

    fn focal(&self) -> (f32, f32) {
        let fx = self.width as f32 / 2.0 / (self.hfov / 2.0).tan();
        let fy = self.height as f32 / 2.0 / (self.vfov / 2.0).tan();
        (fx, fy)
    }

    pub fn project(&self, point: Point3) -> Result<(f32, f32), ProjectionError> {
        if point.z <= 0.0 || !point.z.is_finite() {
            return Err(ProjectionError::BehindSensor {
                x: point.x,
                y: point.y,
                z: point.z,
            });
        }
        let (fx, fy) = self.focal();
        let px = self.width as f32 / 2.0 + fx * point.x / point.z;
        let py = self.height as f32 / 2.0 - fy * point.y / point.z;
        if px < 0.0 || py < 0.0 || px >= self.width as f32 || py >= self.height as f32 {
            return Err(ProjectionError::OutOfFrame {
                px,
                py,
                width: self.width,
                height: self.height,
            });
        }
        Ok((px, py))
    }

    pub fn unproject(&self, px: f32, py: f32, z: f32) -> Point3 {
        let (fx, fy) = self.focal();
        Point3::new(
            (px - self.width as f32 / 2.0) * z / fx,
            (self.height as f32 / 2.0 - py) * z / fy,
            z,
        )
    }

    /// Normalized image coordinates to a real-world point at depth `z`.
    pub fn unproject_normalized(&self, u: f32, v: f32, z: f32) -> Point3 {
        self.unproject(u * self.width as f32, v * self.height as f32, z)
    }
}

impl Projector for Pinhole {
    fn project(&self, point: Point3) -> Result<(f32, f32), ProjectionError> {
        Pinhole::project(self, point)
    }
}

/// Scene geometry at one instant, in normalized image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneState {
    pub body_center: (f32, f32),
    pub body_radii: (f32, f32),
    pub head_center: (f32, f32),
    pub head_radius: f32,
    pub hand_center: (f32, f32),
    pub hand_radius: f32,
    pub hand_depth_mm: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Surface {
    Shadow,
    Wall,
    Body,
    Head,
    Hand,
}

impl SceneState {
    /// Scene at `t` seconds: the user sways and the hand circles while
    /// slowly pushing towards the sensor and back.
    pub fn at(t: f32) -> Self {
        let body_x = 0.5 + 0.08 * (0.6 * t).sin();
        let push = 0.5 + 0.5 * (0.5 * t).sin();
        Self {
            body_center: (body_x, 0.62),
            body_radii: (0.09, 0.25),
            head_center: (body_x, 0.3),
            head_radius: 0.06,
            hand_center: (
                body_x + 0.16 + 0.07 * (1.5 * t).cos(),
                0.45 + 0.07 * (1.5 * t).sin(),
            ),
            hand_radius: 0.035,
            hand_depth_mm: HAND_FAR_MM - (HAND_FAR_MM - HAND_NEAR_MM) * push,
        }
    }

    fn surface(&self, u: f32, v: f32, aspect: f32) -> Surface {
        if u < SHADOW_FRACTION {
            return Surface::Shadow;
        }
        let in_circle = |(cx, cy): (f32, f32), r: f32| {
            let dx = (u - cx) * aspect;
            let dy = v - cy;
            dx * dx + dy * dy <= r * r
        };
        if in_circle(self.hand_center, self.hand_radius) {
            return Surface::Hand;
        }
        if in_circle(self.head_center, self.head_radius) {
            return Surface::Head;
        }
        let (cx, cy) = self.body_center;
        let (rx, ry) = self.body_radii;
        let nx = (u - cx) / rx;
        let ny = (v - cy) / ry;
        if nx * nx + ny * ny <= 1.0 {
            return Surface::Body;
        }
        Surface::Wall
    }

    fn depth_of(&self, surface: Surface, v: f32) -> u16 {
        match surface {
            Surface::Shadow => 0,
            Surface::Wall => WALL_MM + (v * 400.0) as u16,
            Surface::Body | Surface::Head => BODY_MM,
            Surface::Hand => self.hand_depth_mm as u16,
        }
    }

    fn for_each_pixel<F>(&self, width: u32, height: u32, mut f: F)
    where
        F: FnMut(usize, Surface, f32),
    {
        let aspect = width as f32 / height.max(1) as f32;
        for y in 0..height {
            let v = (y as f32 + 0.5) / height as f32;
            for x in 0..width {
                let u = (x as f32 + 0.5) / width as f32;
                let idx = y as usize * width as usize + x as usize;
                f(idx, self.surface(u, v, aspect), v);
            }
        }
    }

    pub fn render_depth(&self, width: u32, height: u32) -> Vec<u16> {
        let mut samples = vec![0u16; width as usize * height as usize];
        self.for_each_pixel(width, height, |idx, surface, v| {
            samples[idx] = self.depth_of(surface, v);
        });
        samples
    }

    /// User id 1 on the user's silhouette, 0 elsewhere.
    pub fn render_labels(&self, width: u32, height: u32) -> Vec<u16> {
        let mut labels = vec![0u16; width as usize * height as usize];
        self.for_each_pixel(width, height, |idx, surface, _| {
            if matches!(surface, Surface::Body | Surface::Head | Surface::Hand) {
                labels[idx] = 1;
            }
        });
        labels
    }

    pub fn render_rgb(&self, width: u32, height: u32) -> Vec<u8> {
        let mut rgb = vec![0u8; width as usize * height as usize * 3];
        self.for_each_pixel(width, height, |idx, surface, v| {
            let color = match surface {
                Surface::Shadow => [20, 20, 24],
                Surface::Wall => [60, 90, (140.0 + 80.0 * v) as u8],
                Surface::Body => [200, 110, 40],
                Surface::Head => [225, 180, 150],
                Surface::Hand => [240, 195, 165],
            };
            rgb[idx * 3..idx * 3 + 3].copy_from_slice(&color);
        });
        rgb
    }

    /// IR intensity falls off with distance; no-return pixels are dark.
    pub fn render_ir(&self, width: u32, height: u32) -> Vec<u16> {
        let mut ir = vec![0u16; width as usize * height as usize];
        self.for_each_pixel(width, height, |idx, surface, v| {
            let depth = self.depth_of(surface, v) as u32;
            ir[idx] = if depth == 0 {
                0
            } else {
                (400_000 / depth).min(1023) as u16
            };
        });
        ir
    }

    pub fn hand_position(&self, camera: &Pinhole) -> Point3 {
        let (u, v) = self.hand_center;
        camera.unproject_normalized(u, v, self.hand_depth_mm)
    }

    pub fn center_of_mass(&self, camera: &Pinhole) -> Point3 {
        let (u, v) = self.body_center;
        camera.unproject_normalized(u, v, BODY_MM as f32)
    }

    /// Joint positions with the confidence a tracker would report. Feet sit
    /// below the frame edge and are only guessed.
    pub fn joints(&self, camera: &Pinhole) -> Vec<(JointKind, Point3, f32)> {
        let (bx, by) = self.body_center;
        let (rx, ry) = self.body_radii;
        let (hx, hy) = self.head_center;
        let body = BODY_MM as f32;
        let at = |u: f32, v: f32, z: f32| camera.unproject_normalized(u, v, z);

        vec![
            (JointKind::Head, at(hx, hy, body), 0.95),
            (JointKind::Neck, at(hx, hy + self.head_radius * 1.3, body), 0.9),
            (JointKind::LeftShoulder, at(bx - rx, by - ry * 0.8, body), 0.9),
            (JointKind::RightShoulder, at(bx + rx, by - ry * 0.8, body), 0.9),
            (JointKind::LeftElbow, at(bx - rx * 1.4, by - ry * 0.3, body), 0.8),
            (
                JointKind::RightElbow,
                at(
                    (bx + rx + self.hand_center.0) / 2.0,
                    (by - ry * 0.6 + self.hand_center.1) / 2.0,
                    (body + self.hand_depth_mm) / 2.0,
                ),
                0.8,
            ),
            (JointKind::LeftHand, at(bx - rx * 1.5, by + ry * 0.1, body), 0.6),
            (
                JointKind::RightHand,
                self.hand_position(camera),
                0.9,
            ),
            (JointKind::Torso, at(bx, by, body), 1.0),
            (JointKind::LeftHip, at(bx - rx * 0.6, by + ry * 0.6, body), 0.85),
            (JointKind::RightHip, at(bx + rx * 0.6, by + ry * 0.6, body), 0.85),
            (JointKind::LeftKnee, at(bx - rx * 0.6, by + ry * 1.1, body), 0.5),
            (JointKind::RightKnee, at(bx + rx * 0.6, by + ry * 1.1, body), 0.5),
            (JointKind::LeftFoot, at(bx - rx * 0.6, by + ry * 1.6, body), 0.3),
            (JointKind::RightFoot, at(bx + rx * 0.6, by + ry * 1.6, body), 0.3),
        ]
    }
}
