//! Tracker and grab detector reporting the scripted test scene.
//!
//! Nothing is recognised here: user presence, gestures and joint
//! confidences follow a fixed timeline over the frame index.

use std::{
    collections::HashMap,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::{GrabDetector, Tracker};
use crate::{
    capture::scene::{Pinhole, SceneState, WALL_MM},
    config::DEFAULT_FPS,
    error::TrackingError,
    pipeline::compositor::Projector,
    types::{
        DepthFrame, GestureData, GestureKind, Hand, HandId, Joint, Point3, RawFrame, Skeleton,
        SkeletonState, TrackerEvent, TrackingFrame, TrackingState, User, UserId, UserLabelMap,
    },
};

const USER_ID: UserId = 1;
/// Frames before the user first walks in.
const USER_ARRIVES: u64 = 3;
const PRESENCE_CYCLE: u64 = 900;
const ABSENT_FRAMES: u64 = 45;
const CALIBRATION_FRAMES: u64 = 10;
const GESTURE_CYCLE: u64 = 120;
/// A hand request must land this close (mm) to the scene's hand.
const HAND_CAPTURE_RADIUS: f32 = 300.0;

fn user_present(index: u64) -> bool {
    index >= USER_ARRIVES && index % PRESENCE_CYCLE < PRESENCE_CYCLE - ABSENT_FRAMES
}

/// Scripted gesture activity at `index`, if any.
fn scripted_gesture(index: u64) -> Option<(GestureKind, bool)> {
    match index % GESTURE_CYCLE {
        30..=44 => Some((GestureKind::Wave, false)),
        45 => Some((GestureKind::Wave, true)),
        75 => Some((GestureKind::HandRaise, true)),
        100..=104 => Some((GestureKind::Click, false)),
        105 => Some((GestureKind::Click, true)),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticTrackerOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Sleep between frames like a real sensor; tests turn this off.
    pub paced: bool,
    /// Report the scene the way a mirrored device shows it.
    pub mirrored: bool,
}

impl Default for SyntheticTrackerOptions {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: DEFAULT_FPS,
            paced: true,
            mirrored: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct TrackedHand {
    id: HandId,
    reported: bool,
}

pub struct SyntheticTracker {
    camera: Pinhole,
    fps: u32,
    paced: bool,
    mirrored: bool,
    next_due: Option<Instant>,
    index: u64,
    user_was_present: bool,
    skeleton_requested: HashMap<UserId, u64>,
    gestures: Vec<GestureKind>,
    hands: Vec<TrackedHand>,
    next_hand_id: HandId,
    events_tx: Sender<TrackerEvent>,
    events_rx: Receiver<TrackerEvent>,
}

impl SyntheticTracker {
    pub fn new(options: SyntheticTrackerOptions) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            camera: Pinhole::new(options.width, options.height),
            fps: options.fps.max(1),
            paced: options.paced,
            mirrored: options.mirrored,
            next_due: None,
            index: 0,
            user_was_present: false,
            skeleton_requested: HashMap::new(),
            gestures: Vec::new(),
            hands: Vec::new(),
            next_hand_id: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn camera(&self) -> Pinhole {
        self.camera
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    /// Sleeps until the next frame is due; false if that is beyond `timeout`.
    fn pace(&mut self, timeout: Duration) -> bool {
        if !self.paced {
            return true;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now + timeout {
            thread::sleep(timeout);
            return false;
        }
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval());
        true
    }

    /// Scene point as reported, flipped left to right when mirrored.
    fn reported(&self, point: Point3) -> Point3 {
        if self.mirrored {
            Point3::new(-point.x, point.y, point.z)
        } else {
            point
        }
    }

    fn hand_at(&self, index: u64) -> Point3 {
        let state = SceneState::at(index as f32 / self.fps as f32);
        self.reported(state.hand_position(&self.camera))
    }

    fn emit(&self, event: TrackerEvent) {
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.events_tx.send(event);
    }

    fn skeleton(&self, state: &SceneState, index: u64) -> Option<Skeleton> {
        let requested = *self.skeleton_requested.get(&USER_ID)?;
        if index < requested + CALIBRATION_FRAMES {
            return Some(Skeleton {
                state: SkeletonState::Calibrating,
                joints: Vec::new(),
            });
        }
        let joints = state
            .joints(&self.camera)
            .into_iter()
            .map(|(kind, position, confidence)| Joint {
                kind,
                position: self.reported(position),
                confidence,
            })
            .collect();
        Some(Skeleton {
            state: SkeletonState::Tracked,
            joints,
        })
    }

    fn build_frame(&mut self) -> TrackingFrame {
        let index = self.index;
        self.index += 1;

        let state = SceneState::at(index as f32 / self.fps as f32);
        let (width, height) = (self.camera.width, self.camera.height);
        let present = user_present(index);

        let mut samples = state.render_depth(width, height);
        let mut labels = state.render_labels(width, height);
        if !present && width > 0 {
            // Without the user the wall shows through their silhouette.
            let rows = samples
                .chunks_exact_mut(width as usize)
                .zip(labels.chunks_exact_mut(width as usize));
            for (y, (depth_row, label_row)) in rows.enumerate() {
                let v = (y as f32 + 0.5) / height as f32;
                let wall = WALL_MM + (v * 400.0) as u16;
                for (sample, label) in depth_row.iter_mut().zip(label_row.iter_mut()) {
                    if *label != 0 {
                        *sample = wall;
                        *label = 0;
                    }
                }
            }
        }
        if self.mirrored && width > 0 {
            for row in samples.chunks_exact_mut(width as usize) {
                row.reverse();
            }
            for row in labels.chunks_exact_mut(width as usize) {
                row.reverse();
            }
        }

        let mut users = Vec::new();
        let mut hands = Vec::new();
        let mut gestures = Vec::new();

        if present {
            let user_state = if self.user_was_present {
                TrackingState::Tracked
            } else {
                TrackingState::New
            };
            users.push(User {
                id: USER_ID,
                state: user_state,
                center_of_mass: self.reported(state.center_of_mass(&self.camera)),
                skeleton: self.skeleton(&state, index),
            });

            let hand_position = self.hand_at(index);
            for hand in &mut self.hands {
                hands.push(Hand {
                    id: hand.id,
                    state: if hand.reported {
                        TrackingState::Tracked
                    } else {
                        TrackingState::New
                    },
                    position: hand_position,
                });
                hand.reported = true;
            }

            if let Some((kind, complete)) = scripted_gesture(index) {
                if self.gestures.contains(&kind) {
                    gestures.push(GestureData {
                        kind,
                        position: hand_position,
                        complete,
                    });
                    if complete {
                        self.emit(TrackerEvent::GestureCompleted {
                            gesture: kind,
                            position: hand_position,
                        });
                    }
                }
            }
        } else if self.user_was_present {
            users.push(User {
                id: USER_ID,
                state: TrackingState::Lost,
                center_of_mass: Point3::default(),
                skeleton: None,
            });
            self.emit(TrackerEvent::UserLost { user: USER_ID });
            self.skeleton_requested.remove(&USER_ID);

            for hand in std::mem::take(&mut self.hands) {
                hands.push(Hand {
                    id: hand.id,
                    state: TrackingState::Lost,
                    position: Point3::default(),
                });
                self.emit(TrackerEvent::HandLost { hand: hand.id });
            }
        }
        self.user_was_present = present;

        let timestamp = self.interval().mul_f64(index as f64);
        let depth = DepthFrame {
            width,
            height,
            samples,
            timestamp,
            index,
        };
        let user_map = UserLabelMap::new(width, height, labels).ok();

        TrackingFrame {
            index,
            depth,
            user_map,
            users,
            hands,
            gestures,
        }
    }
}

impl Tracker for SyntheticTracker {
    fn read_frame(&mut self, timeout: Duration) -> Option<TrackingFrame> {
        if !self.pace(timeout) {
            return None;
        }
        Some(self.build_frame())
    }

    fn projector(&self) -> &dyn Projector {
        &self.camera
    }

    fn start_skeleton_tracking(&mut self, user: UserId) -> Result<(), TrackingError> {
        if user != USER_ID || !user_present(self.index.saturating_sub(1)) {
            return Err(TrackingError::UnknownUser(user));
        }
        self.skeleton_requested.entry(user).or_insert(self.index);
        Ok(())
    }

    fn start_hand_tracking(&mut self, position: Point3) -> Result<HandId, TrackingError> {
        let last = self.index.saturating_sub(1);
        let hand = self.hand_at(last);
        let dx = hand.x - position.x;
        let dy = hand.y - position.y;
        let dz = hand.z - position.z;
        let near = (dx * dx + dy * dy + dz * dz).sqrt() <= HAND_CAPTURE_RADIUS;
        if !user_present(last) || !near {
            return Err(TrackingError::NoHandAt {
                x: position.x,
                y: position.y,
                z: position.z,
            });
        }
        if let Some(existing) = self.hands.first() {
            return Ok(existing.id);
        }
        let id = self.next_hand_id;
        self.next_hand_id = self.next_hand_id.wrapping_add(1).max(1);
        self.hands.push(TrackedHand {
            id,
            reported: false,
        });
        Ok(id)
    }

    fn start_gesture_detection(&mut self, gesture: GestureKind) {
        if !self.gestures.contains(&gesture) {
            self.gestures.push(gesture);
        }
    }

    fn events(&self) -> Receiver<TrackerEvent> {
        self.events_rx.clone()
    }
}

/// Reports a grab when the tracked hand comes closer than `grab_below_mm`
/// and a release once it is back beyond `release_above_mm`.
pub struct SyntheticGrabDetector {
    camera: Pinhole,
    events: Sender<TrackerEvent>,
    hand: Option<(HandId, Point3)>,
    grabbing: bool,
    grab_below_mm: u16,
    release_above_mm: u16,
}

impl SyntheticGrabDetector {
    pub fn new(camera: Pinhole, events: Sender<TrackerEvent>) -> Self {
        Self {
            camera,
            events,
            hand: None,
            grabbing: false,
            grab_below_mm: 1450,
            release_above_mm: 1550,
        }
    }

    pub fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    /// Closest valid sample in a small window around the hand.
    fn hand_depth(&self, depth: &DepthFrame, position: Point3) -> Option<u16> {
        let (px, py) = self.camera.project(position).ok()?;
        let sx = depth.width as f32 / self.camera.width as f32;
        let sy = depth.height as f32 / self.camera.height as f32;
        let (cx, cy) = ((px * sx) as i64, (py * sy) as i64);
        let mut nearest: Option<u16> = None;
        for y in cy - 2..=cy + 2 {
            for x in cx - 2..=cx + 2 {
                if x < 0 || y < 0 {
                    continue;
                }
                if let Some(d) = depth.get(x as u32, y as u32).filter(|&d| d > 0) {
                    nearest = Some(nearest.map_or(d, |n| n.min(d)));
                }
            }
        }
        nearest
    }
}

impl GrabDetector for SyntheticGrabDetector {
    fn set_hand_position(&mut self, hand: HandId, position: Point3) {
        self.hand = Some((hand, position));
    }

    fn update_frame(&mut self, depth: &DepthFrame, color: Option<&RawFrame>) {
        let Some((hand, position)) = self.hand else {
            return;
        };
        if let Some(color) = color {
            if (color.width, color.height) != (depth.width, depth.height) {
                log::debug!(
                    "color {}x{} is not registered to depth {}x{}",
                    color.width,
                    color.height,
                    depth.width,
                    depth.height
                );
            }
        }
        let Some(distance) = self.hand_depth(depth, position) else {
            return;
        };

        let event = if !self.grabbing && distance < self.grab_below_mm {
            self.grabbing = true;
            TrackerEvent::Grab { hand }
        } else if self.grabbing && distance > self.release_above_mm {
            self.grabbing = false;
            TrackerEvent::Release { hand }
        } else {
            return;
        };
        log::info!("{}", event.caption().unwrap_or_default());
        let _ = self.events.send(event);
    }

    fn reset(&mut self) {
        self.hand = None;
        self.grabbing = false;
    }
}
