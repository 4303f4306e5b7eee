//! # Playback Queue & Scheduler
//!
//! Synthesized speech arrives from the agent as independent chunks at
//! unpredictable times. Playing each chunk on arrival would overlap them into
//! garble; this module serializes them instead: a strict FIFO queue drained by
//! a single driver task that keeps **at most one chunk in flight** at any
//! moment. A chunk is "in flight" for its real-time duration at the 24 kHz
//! playback rate, which is what paces delivery to the client.
//!
//! ## Ownership:
//! The queue is mutated from exactly two call sites — the inbound event
//! handler (`enqueue`/`stop`) and the driver task (dequeue). Nothing else may
//! touch it; that is what makes the single-active-chunk invariant hold with
//! one mutex and no further coordination.
//!
//! ## Interruption:
//! `stop()` clears the queue, abandons the in-flight chunk's remaining wait by
//! bumping a generation counter, and lowers the speaking signal — all inside
//! one mutex region, so no chunk can slip in between the clear and the caller
//! returning. Stopping an idle scheduler is an expected no-op.
//!
//! ## The speaking signal:
//! Exposed as a `watch` channel. It rises on the first enqueue and falls only
//! through `stop()` or `settle_idle()`, which confirms the drain over a short
//! poll interval rather than on the first empty check — a momentarily empty
//! queue between rapid chunk arrivals must not flicker the avatar.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::trace;

/// One decoded inbound speech segment awaiting playback.
///
/// Owned exclusively by the queue from arrival until consumed.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    /// f32 samples in [-1.0, 1.0] at the fixed playback rate
    pub samples: Vec<f32>,
}

impl PlaybackChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Real-time duration of this chunk at the given sample rate.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate as f64)
    }
}

/// Where finished chunks go: the browser connection in production, a
/// recording stub in tests.
pub trait PlaybackSink: Send + Sync {
    fn deliver(&self, chunk: &PlaybackChunk);
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sample rate of inbound chunks (fixed 24 kHz in this pipeline)
    pub sample_rate: u32,
    /// Interval for confirming the queue has fully drained
    pub drain_poll: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::audio::codec::PLAYBACK_RATE,
            drain_poll: Duration::from_millis(200),
        }
    }
}

struct QueueState {
    queue: VecDeque<PlaybackChunk>,
    /// True while one chunk occupies its real-time window
    in_flight: bool,
    /// Bumped by `stop()`; the driver abandons waits from older generations
    generation: u64,
}

/// Ordered, single-stream scheduler for inbound speech chunks.
pub struct PlaybackScheduler {
    state: Mutex<QueueState>,
    /// Wakes the driver when work arrives
    work: Notify,
    /// Wakes the driver's in-flight wait when a stop abandons it
    halt: Notify,
    speaking_tx: watch::Sender<bool>,
    sink: Arc<dyn PlaybackSink>,
    config: PlaybackConfig,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>, config: PlaybackConfig) -> Arc<Self> {
        let (speaking_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                in_flight: false,
                generation: 0,
            }),
            work: Notify::new(),
            halt: Notify::new(),
            speaking_tx,
            sink,
            config,
        })
    }

    /// Start the driver task. The handle is aborted on session teardown; the
    /// driver holds no resources beyond its queue reference.
    pub fn spawn_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(scheduler.run())
    }

    /// Append a chunk to the tail and raise the speaking signal.
    pub fn enqueue(&self, chunk: PlaybackChunk) {
        {
            let mut st = self.state.lock().unwrap();
            st.queue.push_back(chunk);
            self.speaking_tx.send_if_modified(|active| {
                let changed = !*active;
                *active = true;
                changed
            });
        }
        self.work.notify_one();
    }

    /// Interruption: discard everything queued, abandon the in-flight wait,
    /// lower the speaking signal. Idempotent; stopping while idle is fine.
    pub fn stop(&self) {
        {
            let mut st = self.state.lock().unwrap();
            st.queue.clear();
            st.in_flight = false;
            st.generation += 1;
            self.speaking_tx.send_if_modified(|active| {
                let changed = *active;
                *active = false;
                changed
            });
        }
        self.halt.notify_one();
    }

    /// Subscribe to the avatar-facing speaking signal.
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking_tx.borrow()
    }

    /// True when the queue is empty and no chunk is in flight.
    pub fn is_drained(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.queue.is_empty() && !st.in_flight
    }

    /// Poll until drained, then lower the speaking signal.
    ///
    /// The first check happens only after one poll interval, so a transient
    /// empty window between chunk arrivals never drops the signal early. The
    /// drained check and the signal change share the lock, so a chunk arriving
    /// concurrently either delays the drop or re-raises the signal afterwards
    /// in order.
    pub async fn settle_idle(&self) {
        loop {
            tokio::time::sleep(self.config.drain_poll).await;
            if !self.is_drained() {
                continue;
            }
            // Re-check under the lock so a chunk racing in between the
            // drained observation and the signal change cannot be missed.
            let st = self.state.lock().unwrap();
            if st.queue.is_empty() && !st.in_flight {
                self.speaking_tx.send_if_modified(|active| {
                    let changed = *active;
                    *active = false;
                    changed
                });
                return;
            }
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            // Claim the head chunk. Pop, flag, and delivery happen inside one
            // lock region so a concurrent stop() can never race a chunk past
            // its queue-clear.
            let (generation, window) = loop {
                {
                    let mut st = self.state.lock().unwrap();
                    if let Some(chunk) = st.queue.pop_front() {
                        debug_assert!(!st.in_flight, "second chunk scheduled while one active");
                        st.in_flight = true;
                        let window = chunk.duration(self.config.sample_rate);
                        self.sink.deliver(&chunk);
                        trace!(samples = chunk.samples.len(), "playback chunk started");
                        break (st.generation, window);
                    }
                }
                self.work.notified().await;
            };

            // Hold the in-flight slot for the chunk's real-time duration,
            // or until a stop abandons this generation.
            let deadline = tokio::time::Instant::now() + window;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.halt.notified() => {
                        let st = self.state.lock().unwrap();
                        if st.generation != generation {
                            break;
                        }
                        // Stale halt permit from an earlier stop; keep waiting.
                    }
                }
            }

            let mut st = self.state.lock().unwrap();
            if st.generation == generation {
                st.in_flight = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    /// Records (virtual start time, duration, sample count) per delivery.
    #[derive(Default)]
    struct RecordingSink {
        deliveries: Mutex<Vec<(Instant, Duration, usize)>>,
    }

    impl PlaybackSink for RecordingSink {
        fn deliver(&self, chunk: &PlaybackChunk) {
            self.deliveries.lock().unwrap().push((
                Instant::now(),
                chunk.duration(24_000),
                chunk.samples.len(),
            ));
        }
    }

    fn scheduler_with_sink() -> (Arc<PlaybackScheduler>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = PlaybackScheduler::new(
            sink.clone() as Arc<dyn PlaybackSink>,
            PlaybackConfig {
                sample_rate: 24_000,
                drain_poll: Duration::from_millis(200),
            },
        );
        (scheduler, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_fifo_without_overlap() {
        let (scheduler, sink) = scheduler_with_sink();
        let driver = scheduler.spawn_driver();

        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 2400])); // 100ms
        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 4800])); // 200ms
        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 1200])); // 50ms

        tokio::time::sleep(Duration::from_secs(2)).await;

        let deliveries = sink.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 3);
        // Arrival order preserved
        assert_eq!(deliveries[0].2, 2400);
        assert_eq!(deliveries[1].2, 4800);
        assert_eq!(deliveries[2].2, 1200);
        // Never two chunks active: each starts at or after the previous end
        for pair in deliveries.windows(2) {
            let (start, duration, _) = pair[0];
            let (next_start, _, _) = pair[1];
            assert!(
                next_start >= start + duration,
                "chunk started before the previous one finished"
            );
        }

        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_is_silent() {
        let (scheduler, sink) = scheduler_with_sink();
        let driver = scheduler.spawn_driver();

        scheduler.stop();
        scheduler.stop();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(scheduler.is_drained());
        assert!(!scheduler.is_speaking());
        assert!(sink.deliveries.lock().unwrap().is_empty());

        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_queued_chunks() {
        let (scheduler, sink) = scheduler_with_sink();
        let driver = scheduler.spawn_driver();

        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 4800]));
        // Let the driver claim the first chunk
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 4800]));
        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 4800]));
        scheduler.stop();

        tokio::time::sleep(Duration::from_secs(2)).await;

        // Only the chunk already in flight was delivered
        assert_eq!(sink.deliveries.lock().unwrap().len(), 1);
        assert!(scheduler.is_drained());
        assert!(!scheduler.is_speaking());

        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_after_stop() {
        let (scheduler, sink) = scheduler_with_sink();
        let driver = scheduler.spawn_driver();

        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 4800]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.stop();

        // A new turn after the interruption plays normally
        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 2400]));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let deliveries = sink.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[1].2, 2400);

        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_rises_on_enqueue_and_falls_on_settle() {
        let (scheduler, _sink) = scheduler_with_sink();
        let driver = scheduler.spawn_driver();

        assert!(!scheduler.is_speaking());
        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 2400]));
        assert!(scheduler.is_speaking());

        // Playback ends at 100ms, but the signal holds until settled
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(scheduler.is_speaking());

        scheduler.settle_idle().await;
        assert!(!scheduler.is_speaking());
        assert!(scheduler.is_drained());

        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_holds_until_drained() {
        let (scheduler, _sink) = scheduler_with_sink();
        let driver = scheduler.spawn_driver();

        // 4800 samples = 200ms in flight
        scheduler.enqueue(PlaybackChunk::new(vec![0.0; 4800]));

        let settle = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.settle_idle().await })
        };

        // Mid-playback the signal must still be up
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.is_speaking());

        settle.await.unwrap();
        assert!(!scheduler.is_speaking());

        driver.abort();
    }
}
