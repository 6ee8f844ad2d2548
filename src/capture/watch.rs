//! Device hot-plug notifications by polling enumeration.

use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::{CaptureBackend, DeviceInfo, channel::Producer};
use crate::error::CaptureError;

const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceInfo),
    Disconnected(DeviceInfo),
}

impl DeviceEvent {
    pub fn describe(&self) -> String {
        match self {
            DeviceEvent::Connected(info) => format!("device connected: {}", info.name),
            DeviceEvent::Disconnected(info) => format!("device disconnected: {}", info.name),
        }
    }
}

/// Events turning `previous` into `current`, matched by URI.
pub fn diff_devices(previous: &[DeviceInfo], current: &[DeviceInfo]) -> Vec<DeviceEvent> {
    let mut events: Vec<DeviceEvent> = previous
        .iter()
        .filter(|old| !current.iter().any(|new| new.uri == old.uri))
        .cloned()
        .map(DeviceEvent::Disconnected)
        .collect();
    events.extend(
        current
            .iter()
            .filter(|new| !previous.iter().any(|old| old.uri == new.uri))
            .cloned()
            .map(DeviceEvent::Connected),
    );
    events
}

pub struct DeviceWatcher {
    _producer: Producer,
}

impl DeviceWatcher {
    /// Starts polling; devices present at start are reported as connected.
    pub fn spawn(
        backend: Arc<dyn CaptureBackend>,
        interval: Duration,
    ) -> Result<(Self, Receiver<DeviceEvent>), CaptureError> {
        let (tx, rx) = unbounded();
        let producer = Producer::spawn("device-watch".to_string(), move |stop| {
            let mut known = Vec::new();
            while !stop.load(Ordering::Relaxed) {
                if !poll_once(backend.as_ref(), &mut known, &tx) {
                    return;
                }
                let due = Instant::now() + interval;
                while !stop.load(Ordering::Relaxed) && Instant::now() < due {
                    thread::sleep(STOP_POLL.min(interval));
                }
            }
        })?;
        Ok((
            Self {
                _producer: producer,
            },
            rx,
        ))
    }
}

/// Returns false once nobody listens any more.
fn poll_once(
    backend: &dyn CaptureBackend,
    known: &mut Vec<DeviceInfo>,
    tx: &Sender<DeviceEvent>,
) -> bool {
    let current = match backend.enumerate() {
        Ok(devices) => devices,
        Err(err) => {
            log::warn!("device enumeration failed: {err}");
            return true;
        }
    };
    for event in diff_devices(known, &current) {
        log::debug!("{}", event.describe());
        if tx.send(event).is_err() {
            return false;
        }
    }
    *known = current;
    true
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::capture::CaptureDevice;

    fn device(uri: &str) -> DeviceInfo {
        DeviceInfo {
            uri: uri.to_string(),
            name: uri.to_uppercase(),
            vendor: "test".to_string(),
            usb_vendor_id: 0,
            usb_product_id: 0,
        }
    }

    struct Pluggable(Mutex<Vec<DeviceInfo>>);

    impl CaptureBackend for Pluggable {
        fn name(&self) -> &'static str {
            "pluggable"
        }

        fn enumerate(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn open(&self, uri: &str) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Err(CaptureError::DeviceUnavailable(uri.to_string()))
        }
    }

    #[test]
    fn diff_reports_both_directions() {
        let a = device("a");
        let b = device("b");
        let c = device("c");
        let events = diff_devices(&[a.clone(), b.clone()], &[b, c.clone()]);
        assert_eq!(
            events,
            vec![DeviceEvent::Disconnected(a), DeviceEvent::Connected(c)]
        );
        assert!(diff_devices(&[device("x")], &[device("x")]).is_empty());
    }

    #[test]
    fn watcher_follows_plug_and_unplug() {
        let backend = Arc::new(Pluggable(Mutex::new(vec![device("a")])));
        let (watcher, events) =
            DeviceWatcher::spawn(backend.clone(), Duration::from_millis(5)).unwrap();
        let timeout = Duration::from_secs(2);

        assert_eq!(
            events.recv_timeout(timeout).unwrap(),
            DeviceEvent::Connected(device("a"))
        );

        backend.0.lock().unwrap().push(device("b"));
        assert_eq!(
            events.recv_timeout(timeout).unwrap(),
            DeviceEvent::Connected(device("b"))
        );

        backend.0.lock().unwrap().remove(0);
        assert_eq!(
            events.recv_timeout(timeout).unwrap(),
            DeviceEvent::Disconnected(device("a"))
        );
        drop(watcher);
    }
}
