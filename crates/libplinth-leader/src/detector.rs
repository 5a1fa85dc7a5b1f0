//! Periodic leader detection
//!
//! The poll loop and its consumer meet at a rendezvous: an event is handed
//! over through a single-slot channel and the loop does not poll again
//! until the consumer has taken it. A slow consumer delays the next poll
//! instead of piling up stale transitions.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::error::LeaderError;

/// Leadership status reported by one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotLeader,
    Leader,
    /// The probe failed; leadership could not be determined
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotLeader => "not_leader",
            Status::Leader => "leader",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leadership observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub status: Status,
    /// Set only for [`Status::Unknown`]
    pub error: Option<LeaderError>,
}

impl Event {
    /// Map a probe outcome onto an event. Errors never become
    /// `Leader` or `NotLeader`.
    pub fn from_probe(outcome: Result<bool, LeaderError>) -> Self {
        match outcome {
            Ok(true) => Self {
                status: Status::Leader,
                error: None,
            },
            Ok(false) => Self {
                status: Status::NotLeader,
                error: None,
            },
            Err(e) => Self {
                status: Status::Unknown,
                error: Some(e),
            },
        }
    }
}

/// Answers whether this instance is currently the leader
///
/// Probes may block; the detector runs them on the blocking pool.
pub trait Probe: Send + Sync + 'static {
    fn is_leader(&self) -> Result<bool, LeaderError>;
}

impl<F> Probe for F
where
    F: Fn() -> Result<bool, LeaderError> + Send + Sync + 'static,
{
    fn is_leader(&self) -> Result<bool, LeaderError> {
        self()
    }
}

/// Receiving side of a detector's events
///
/// Clones share one underlying stream; each event is delivered once.
#[derive(Clone)]
pub struct EventStream {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
}

impl EventStream {
    /// Next event, or `None` once the detector has stopped
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    /// Close the stream and throw away anything not yet received
    async fn close(&self) {
        let mut rx = self.rx.lock().await;
        rx.close();
        while rx.try_recv().is_ok() {}
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    events: EventStream,
}

/// Periodic leader detector
pub struct Detector {
    interval: Duration,
    probe: Arc<dyn Probe>,
    running: Mutex<Option<Running>>,
}

impl Detector {
    pub fn new(interval: Duration, probe: Arc<dyn Probe>) -> Self {
        Self {
            interval,
            probe,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start polling and return the event stream
    ///
    /// Starting a running detector returns the stream it already has. A
    /// zero interval is rejected.
    pub fn start(&self) -> Result<EventStream, LeaderError> {
        if self.interval.is_zero() {
            return Err(LeaderError::ZeroInterval);
        }

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = running.as_ref() {
            return Ok(running.events.clone());
        }

        let runtime = Handle::try_current().map_err(|_| LeaderError::NoRuntime)?;
        let (tx, rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let events = EventStream {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        };

        let handle = runtime.spawn(poll_loop(self.interval, self.probe.clone(), tx, stop_rx));
        debug!(interval_ms = self.interval.as_millis() as u64, "Leader detector started");

        *running = Some(Running {
            stop: stop_tx,
            handle,
            events: events.clone(),
        });
        Ok(events)
    }

    /// Stop polling
    ///
    /// Returns once the poll loop has exited and the stream is closed; no
    /// event is received after that. Stopping a stopped detector is a no-op.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        running.stop.send_replace(true);
        if let Err(e) = running.handle.await {
            warn!("Leader poll loop ended abnormally: {}", e);
        }
        running.events.close().await;
        debug!("Leader detector stopped");
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.stop.send_replace(true);
        }
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn poll_loop(
    interval: Duration,
    probe: Arc<dyn Probe>,
    tx: mpsc::Sender<Event>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        // An in-flight probe is not interrupted; its result is dropped.
        let probe = probe.clone();
        let outcome = tokio::select! {
            biased;
            _ = stop.changed() => break,
            joined = tokio::task::spawn_blocking(move || probe.is_leader()) => joined,
        };
        let event = match outcome {
            Ok(outcome) => Event::from_probe(outcome),
            Err(e) => Event::from_probe(Err(LeaderError::Probe(e.to_string()))),
        };
        trace!(status = %event.status, "Leader poll");

        tokio::select! {
            biased;
            _ = stop.changed() => break,
            sent = tx.send(event) => if sent.is_err() { break },
        }

        // Wait for the consumer to take the event
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            permit = tx.reserve() => match permit {
                Ok(permit) => drop(permit),
                Err(_) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn fixed(answer: bool) -> Arc<dyn Probe> {
        Arc::new(move || Ok(answer))
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(Event::from_probe(Ok(true)).status, Status::Leader);
        assert_eq!(Event::from_probe(Ok(false)).status, Status::NotLeader);

        let event = Event::from_probe(Err(LeaderError::Probe("boom".into())));
        assert_eq!(event.status, Status::Unknown);
        assert_eq!(event.error, Some(LeaderError::Probe("boom".into())));
    }

    #[test]
    fn test_start_outside_runtime() {
        let detector = Detector::new(Duration::from_millis(10), fixed(true));
        assert_eq!(detector.start().unwrap_err(), LeaderError::NoRuntime);
        assert!(!detector.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let detector = Detector::new(Duration::ZERO, fixed(true));
        assert_eq!(detector.start().unwrap_err(), LeaderError::ZeroInterval);
        assert!(!detector.is_running());
        detector.stop().await;
    }

    #[tokio::test]
    async fn test_first_poll_is_immediate() {
        let detector = Detector::new(Duration::from_secs(3600), fixed(true));
        let events = detector.start().unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, Status::Leader);
        detector.stop().await;
    }

    #[tokio::test]
    async fn test_probe_error_is_unknown() {
        let detector = Detector::new(
            Duration::from_millis(5),
            Arc::new(|| Err(LeaderError::Probe("unreachable".into()))),
        );
        let events = detector.start().unwrap();
        for _ in 0..3 {
            let event = events.recv().await.unwrap();
            assert_eq!(event.status, Status::Unknown);
            assert!(event.error.is_some());
        }
        detector.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_shares_stream() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let detector = Detector::new(
            Duration::from_secs(3600),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }),
        );

        let first = detector.start().unwrap();
        let second = detector.start().unwrap();
        assert_eq!(second.recv().await.unwrap().status, Status::NotLeader);
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        // The event was consumed through the shared stream
        assert!(tokio::time::timeout(Duration::from_millis(50), first.recv())
            .await
            .is_err());
        detector.stop().await;
    }

    #[tokio::test]
    async fn test_loop_waits_for_consumer() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let detector = Detector::new(
            Duration::from_millis(1),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }),
        );

        let events = detector.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        events.recv().await.unwrap();
        events.recv().await.unwrap();
        assert!(polls.load(Ordering::SeqCst) >= 2);
        detector.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let detector = Detector::new(Duration::from_millis(1), fixed(true));
        let events = detector.start().unwrap();
        events.recv().await.unwrap();

        detector.stop().await;
        detector.stop().await;
        assert!(!detector.is_running());
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_stop_during_slow_probe() {
        let release = Arc::new(AtomicBool::new(false));
        let gate = release.clone();
        let detector = Detector::new(
            Duration::from_millis(1),
            Arc::new(move || {
                while !gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(true)
            }),
        );

        let events = detector.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        detector.stop().await;
        release.store(true, Ordering::SeqCst);

        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let detector = Detector::new(Duration::from_millis(1), fixed(false));
        let events = detector.start().unwrap();
        events.recv().await.unwrap();
        detector.stop().await;

        let events = detector.start().unwrap();
        assert_eq!(events.recv().await.unwrap().status, Status::NotLeader);
        detector.stop().await;
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(serde_json::to_string(&Status::NotLeader).unwrap(), "\"not_leader\"");
        assert_eq!(Status::Leader.to_string(), "leader");
    }
}
