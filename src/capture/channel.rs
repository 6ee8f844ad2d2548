//! Latest-frame hand-off between producer threads and a frame pump.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, TrySendError, bounded};

use crate::error::CaptureError;

/// Newest queued item plus how many older ones were thrown away to get it.
#[derive(Clone, Debug)]
pub struct Latest<T> {
    pub item: T,
    pub dropped: u64,
}

pub type Item<T> = Result<T, CaptureError>;

pub struct Publisher<T> {
    tx: Sender<Item<T>>,
    // Held to evict the stale head when the queue is full.
    rx: Receiver<Item<T>>,
    evicted: Arc<AtomicU64>,
}

pub struct Subscriber<T> {
    rx: Receiver<Item<T>>,
    evicted: Arc<AtomicU64>,
}

pub fn latest_queue<T>(depth: usize) -> (Publisher<T>, Subscriber<T>) {
    let (tx, rx) = bounded(depth.max(1));
    let evicted = Arc::new(AtomicU64::new(0));
    (
        Publisher {
            tx,
            rx: rx.clone(),
            evicted: evicted.clone(),
        },
        Subscriber { rx, evicted },
    )
}

impl<T> Publisher<T> {
    /// Queues `item`, evicting the oldest queued item if the queue is full.
    pub fn publish(&self, item: Item<T>) {
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                    item = back;
                }
                // Unreachable while we hold a receiver ourselves.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl<T> Subscriber<T> {
    pub fn receiver(&self) -> &Receiver<Item<T>> {
        &self.rx
    }

    /// Drains the queue and keeps only the newest item.
    pub fn drain_latest(&self) -> Result<Option<Latest<T>>, CaptureError> {
        let mut latest = None;
        let mut seen = 0u64;
        loop {
            match self.rx.try_recv() {
                Ok(item) => {
                    seen += 1;
                    latest = Some(item);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_none() {
                        return Err(CaptureError::Disconnected);
                    }
                    break;
                }
            }
        }

        let Some(latest) = latest else {
            return Ok(None);
        };
        let dropped = seen.saturating_sub(1) + self.evicted.swap(0, Ordering::Relaxed);
        latest.map(|item| Some(Latest { item, dropped }))
    }
}

/// Blocks until one of `subscribers` has something queued, returning its
/// index, or gives up after `timeout`.
pub fn wait_for_any<T>(subscribers: &[&Subscriber<T>], timeout: Duration) -> Option<usize> {
    if subscribers.is_empty() {
        thread::sleep(timeout);
        return None;
    }
    let mut select = Select::new();
    for subscriber in subscribers {
        select.recv(subscriber.receiver());
    }
    select.ready_timeout(timeout).ok()
}

/// Background thread with a cooperative stop flag, joined on drop.
#[derive(Debug)]
pub struct Producer {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Producer {
    pub fn spawn<F>(name: String, body: F) -> Result<Self, CaptureError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(stop_flag))
            .map_err(|err| CaptureError::DeviceUnavailable(format!("{name}: {err}")))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn drain_keeps_newest_and_counts_the_rest() {
        let (publisher, subscriber) = latest_queue::<u32>(8);
        for i in 0..5 {
            publisher.publish(Ok(i));
        }
        let latest = subscriber.drain_latest().unwrap().unwrap();
        assert_eq!(latest.item, 4);
        assert_eq!(latest.dropped, 4);
        assert!(subscriber.drain_latest().unwrap().is_none());
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let (publisher, subscriber) = latest_queue::<u32>(1);
        for i in 0..3 {
            publisher.publish(Ok(i));
        }
        let latest = subscriber.drain_latest().unwrap().unwrap();
        assert_eq!(latest.item, 2);
        assert_eq!(latest.dropped, 2);
    }

    #[test]
    fn newest_error_is_reported() {
        let (publisher, subscriber) = latest_queue::<u32>(4);
        publisher.publish(Ok(1));
        publisher.publish(Err(CaptureError::FrameReadFailure("glitch".into())));
        assert!(matches!(
            subscriber.drain_latest(),
            Err(CaptureError::FrameReadFailure(_))
        ));
    }

    #[test]
    fn dropped_publisher_disconnects() {
        let (publisher, subscriber) = latest_queue::<u32>(2);
        publisher.publish(Ok(9));
        drop(publisher);
        assert_eq!(subscriber.drain_latest().unwrap().unwrap().item, 9);
        assert!(matches!(
            subscriber.drain_latest(),
            Err(CaptureError::Disconnected)
        ));
    }

    #[test]
    fn wait_for_any_reports_ready_index_or_times_out() {
        let (_a_pub, a_sub) = latest_queue::<u32>(1);
        let (b_pub, b_sub) = latest_queue::<u32>(1);

        let start = Instant::now();
        assert_eq!(
            wait_for_any(&[&a_sub, &b_sub], Duration::from_millis(20)),
            None
        );
        assert!(start.elapsed() >= Duration::from_millis(15));

        b_pub.publish(Ok(1));
        assert_eq!(
            wait_for_any(&[&a_sub, &b_sub], Duration::from_millis(100)),
            Some(1)
        );
    }

    #[test]
    fn producer_stops_on_drop() {
        let (publisher, subscriber) = latest_queue::<u64>(1);
        let producer = Producer::spawn("test-producer".into(), move |stop| {
            let mut n = 0;
            while !stop.load(Ordering::Relaxed) {
                publisher.publish(Ok(n));
                n += 1;
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert!(wait_for_any(&[&subscriber], Duration::from_secs(1)).is_some());
        drop(producer);
        // The publisher moved into the thread is gone once it is joined.
        let _ = subscriber.drain_latest();
        assert!(matches!(
            subscriber.drain_latest(),
            Err(CaptureError::Disconnected)
        ));
    }
}
