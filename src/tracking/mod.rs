//! Body and hand tracking collaborators.
//!
//! The tracker owns entity lifecycles; the session below only reacts to what
//! it reports, the way the samples start skeleton tracking for new users and
//! hand tracking where a gesture completed.

pub mod synthetic;

use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::{
    error::TrackingError,
    pipeline::compositor::Projector,
    types::{
        DepthFrame, GestureKind, HandId, Point3, RawFrame, TrackerEvent, TrackingFrame,
        TrackingState, UserId,
    },
};

pub use synthetic::{SyntheticGrabDetector, SyntheticTracker, SyntheticTrackerOptions};

pub trait Tracker: Send {
    /// Next snapshot, or `None` if none arrived within `timeout`.
    fn read_frame(&mut self, timeout: Duration) -> Option<TrackingFrame>;

    /// Real-world to depth-image coordinates.
    fn projector(&self) -> &dyn Projector;

    fn start_skeleton_tracking(&mut self, user: UserId) -> Result<(), TrackingError>;

    fn start_hand_tracking(&mut self, position: Point3) -> Result<HandId, TrackingError>;

    fn start_gesture_detection(&mut self, gesture: GestureKind);

    /// Gesture completions and entity loss, in the order they happened.
    fn events(&self) -> Receiver<TrackerEvent>;
}

/// Grab/release classifier fed with a tracked hand and synchronized frames.
/// Results are pushed as `TrackerEvent::Grab` / `Release`.
pub trait GrabDetector: Send {
    fn set_hand_position(&mut self, hand: HandId, position: Point3);

    fn update_frame(&mut self, depth: &DepthFrame, color: Option<&RawFrame>);

    fn reset(&mut self);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionPlan {
    pub track_skeletons: bool,
    pub gestures: Vec<GestureKind>,
    pub hands_from_gestures: bool,
}

impl SessionPlan {
    pub fn begin(&self, tracker: &mut dyn Tracker) {
        for &gesture in &self.gestures {
            log::info!("detecting {} gestures", gesture.label());
            tracker.start_gesture_detection(gesture);
        }
    }

    /// Starts whatever tracking this frame asks for. Failures only cost the
    /// request; the next frame can ask again.
    pub fn react(&self, tracker: &mut dyn Tracker, frame: &TrackingFrame) {
        if self.track_skeletons {
            for user in frame.users.iter().filter(|u| u.state == TrackingState::New) {
                match tracker.start_skeleton_tracking(user.id) {
                    Ok(()) => log::info!("user {} found, starting skeleton tracking", user.id),
                    Err(err) => log::warn!("skeleton tracking not started: {err}"),
                }
            }
        }

        if self.hands_from_gestures {
            for gesture in frame.gestures.iter().filter(|g| g.complete) {
                match tracker.start_hand_tracking(gesture.position) {
                    Ok(hand) => log::debug!(
                        "{} completed, tracking hand {hand}",
                        gesture.kind.label()
                    ),
                    Err(err) => log::warn!("hand tracking not started: {err}"),
                }
            }
        }
    }
}

/// Hands currently tracked in `frame`.
pub fn tracked_hands(frame: &TrackingFrame) -> impl Iterator<Item = (HandId, Point3)> + '_ {
    frame
        .hands
        .iter()
        .filter(|hand| hand.state != TrackingState::Lost)
        .map(|hand| (hand.id, hand.position))
}
