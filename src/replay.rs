//! Timed re-injection of recorded events.
//!
//! Events are delivered at their recorded offsets from the first event.
//! When the next event is further away than the resync gap, the wait is
//! capped and the timeline is re-anchored on that event at the moment the
//! capped wait starts.

use crate::error::Result;
use crate::recording::Session;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, trace};

pub const DEFAULT_MAX_RESYNC_GAP: Duration = Duration::from_secs(2);

/// Waits shorter than this are skipped
pub const CATCH_UP_THRESHOLD: Duration = Duration::from_millis(10);

/// Anything that can take an input report for a device index
pub trait EventSink {
    fn inject(&mut self, device_index: u32, payload: &[u8]) -> Result<()>;
}

/// What to do before delivering an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Immediate,
    SleepUntil(Instant),
    /// Sleep this long; the timeline has been re-anchored on this event
    Resync(Duration),
}

/// Maps recorded timestamps onto the monotonic clock
#[derive(Debug, Clone)]
pub struct Pacer {
    max_resync_gap: Duration,
    baseline: Option<(Instant, f64)>,
}
impl Pacer {
    pub fn new(max_resync_gap: Duration) -> Self {
        Self {
            max_resync_gap,
            baseline: None,
        }
    }

    /// Forget the baseline; the next event becomes the new origin
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    pub fn plan(&mut self, now: Instant, timestamp: f64) -> Pacing {
        let (t0, ts0) = *self.baseline.get_or_insert((now, timestamp));
        let offset = timestamp - ts0;
        if offset <= 0.0 {
            return Pacing::Immediate;
        }

        let target = match Duration::try_from_secs_f64(offset) {
            Ok(offset) => t0 + offset,
            Err(_) => return self.resync(now, timestamp),
        };
        let wait = target.saturating_duration_since(now);
        if wait < CATCH_UP_THRESHOLD {
            Pacing::Immediate
        } else if wait < self.max_resync_gap {
            Pacing::SleepUntil(target)
        } else {
            self.resync(now, timestamp)
        }
    }

    /// Re-anchor the timeline on this event at `now`
    fn resync(&mut self, now: Instant, timestamp: f64) -> Pacing {
        self.baseline = Some((now, timestamp));
        Pacing::Resync(self.max_resync_gap)
    }
}

/// Replays a session's events into a sink, one pass per call
#[derive(Debug, Clone)]
pub struct ReplayScheduler {
    pacer: Pacer,
    passes: usize,
}
impl Default for ReplayScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESYNC_GAP)
    }
}
impl ReplayScheduler {
    pub fn new(max_resync_gap: Duration) -> Self {
        Self {
            pacer: Pacer::new(max_resync_gap),
            passes: 0,
        }
    }

    /// Completed passes
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Deliver every event of `session` in file order, paced by timestamp.
    /// Returns the number of completed passes.
    pub async fn inject_events<S: EventSink>(&mut self, sink: &mut S, session: &Session) -> Result<usize> {
        self.pacer.reset();
        info!(
            "Replaying {} events ({:.3}s)",
            session.events.len(),
            session.duration()
        );

        for event in &session.events {
            match self.pacer.plan(Instant::now(), event.timestamp) {
                Pacing::Immediate => {}
                Pacing::SleepUntil(target) => sleep_until(target).await,
                Pacing::Resync(gap) => {
                    debug!("Gap before {:.6}s, resyncing after {:?}", event.timestamp, gap);
                    sleep(gap).await;
                }
            }
            trace!(
                "Device {} <- {} bytes at {:.6}",
                event.device_index,
                event.payload.len(),
                event.timestamp
            );
            sink.inject(event.device_index, &event.payload)?;
        }

        self.passes += 1;
        info!("Replay pass {} done", self.passes);
        Ok(self.passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::recording::RecordedEvent;

    #[derive(Default)]
    struct Collector {
        seen: Vec<(Instant, u32, Vec<u8>)>,
        fail_on: Option<u32>,
    }
    impl EventSink for Collector {
        fn inject(&mut self, device_index: u32, payload: &[u8]) -> Result<()> {
            if self.fail_on == Some(device_index) {
                return Err(Error::DeviceNotReady {
                    index: device_index,
                });
            }
            self.seen
                .push((Instant::now(), device_index, payload.to_vec()));
            Ok(())
        }
    }

    fn session(timestamps: &[(u32, f64)]) -> Session {
        let mut session = Session::default();
        for (n, (index, timestamp)) in timestamps.iter().enumerate() {
            session.events.push(RecordedEvent {
                device_index: *index,
                timestamp: *timestamp,
                declared_count: 1,
                payload: vec![n as u8],
            });
        }
        session
    }

    fn offsets(collector: &Collector) -> Vec<Duration> {
        let start = collector.seen[0].0;
        collector.seen.iter().map(|(at, _, _)| *at - start).collect()
    }

    #[test]
    fn plan_rules() {
        let now = Instant::now();
        let mut pacer = Pacer::new(Duration::from_secs(2));
        assert_eq!(pacer.plan(now, 5.0), Pacing::Immediate);
        assert_eq!(pacer.plan(now, 5.005), Pacing::Immediate);
        assert_eq!(
            pacer.plan(now, 5.5),
            Pacing::SleepUntil(now + Duration::from_millis(500))
        );
        // Target already in the past
        assert_eq!(
            pacer.plan(now + Duration::from_secs(1), 5.5),
            Pacing::Immediate
        );
        assert_eq!(
            pacer.plan(now, 10.0),
            Pacing::Resync(Duration::from_secs(2))
        );
        // Re-anchored on the 10.0 event at the start of the capped wait
        assert_eq!(
            pacer.plan(now, 10.5),
            Pacing::SleepUntil(now + Duration::from_millis(500))
        );
        assert_eq!(
            pacer.plan(now + Duration::from_secs(2), 10.5),
            Pacing::Immediate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_recorded_spacing() {
        let mut sink = Collector::default();
        let session = session(&[(0, 0.0), (0, 0.016), (1, 0.032), (0, 0.532)]);
        ReplayScheduler::default()
            .inject_events(&mut sink, &session)
            .await
            .unwrap();
        assert_eq!(
            offsets(&sink),
            vec![
                Duration::ZERO,
                Duration::from_millis(16),
                Duration::from_millis(32),
                Duration::from_millis(532),
            ]
        );
        let indexes: Vec<u32> = sink.seen.iter().map(|(_, i, _)| *i).collect();
        assert_eq!(indexes, vec![0, 0, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_pause_is_capped() {
        let mut sink = Collector::default();
        let session = session(&[(0, 0.0), (0, 60.0), (0, 60.5)]);
        ReplayScheduler::new(Duration::from_secs(2))
            .inject_events(&mut sink, &session)
            .await
            .unwrap();
        // 60.5 is due half a second after the anchor, which the capped
        // wait already covered
        assert_eq!(
            offsets(&sink),
            vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(2),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_events_are_not_delayed() {
        let mut sink = Collector::default();
        let session = session(&[(0, 1.0), (0, 1.004), (0, 1.008)]);
        ReplayScheduler::default()
            .inject_events(&mut sink, &session)
            .await
            .unwrap();
        assert!(offsets(&sink).iter().all(|d| *d == Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn every_pass_starts_over() {
        let mut sink = Collector::default();
        let session = session(&[(0, 0.0), (0, 0.1)]);
        let mut scheduler = ReplayScheduler::default();
        assert_eq!(scheduler.inject_events(&mut sink, &session).await.unwrap(), 1);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.inject_events(&mut sink, &session).await.unwrap(), 2);

        let offsets = offsets(&sink);
        assert_eq!(offsets[3] - offsets[2], Duration::from_millis(100));
        assert_eq!(scheduler.passes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_errors_abort_the_pass() {
        let mut sink = Collector {
            fail_on: Some(1),
            ..Collector::default()
        };
        let session = session(&[(0, 0.0), (1, 0.0), (0, 0.0)]);
        let mut scheduler = ReplayScheduler::default();
        let err = scheduler.inject_events(&mut sink, &session).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotReady { index: 1 }));
        assert_eq!(sink.seen.len(), 1);
        assert_eq!(scheduler.passes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_completes() {
        let mut sink = Collector::default();
        let mut scheduler = ReplayScheduler::default();
        assert_eq!(
            scheduler
                .inject_events(&mut sink, &Session::default())
                .await
                .unwrap(),
            1
        );
        assert!(sink.seen.is_empty());
    }
}
