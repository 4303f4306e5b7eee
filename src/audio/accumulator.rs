//! # Microphone Frame Accumulation
//!
//! Browsers deliver capture callbacks in whatever frame size the audio stack
//! chooses (128-sample worklet quanta, 4096-sample processor blocks, anything
//! in between), while the agent transport wants steady 100 ms packets. The
//! accumulator bridges the two: variable frames in, exact fixed-size send
//! units out.
//!
//! ## Invariants:
//! - No sample is dropped: partial frames stay pending until the threshold
//!   is met.
//! - Every emitted unit is exactly `send_unit_samples` long; the remainder is
//!   carried over to the next push rather than flushed short or padded.
//! - `reset()` clears pending samples so a torn-down session can never leak
//!   stale audio into a later one.

/// One fixed-length batch of microphone samples ready for encoding.
pub type SendUnit = Vec<f32>;

/// Merges variable-size capture frames into fixed-size send units.
pub struct FrameAccumulator {
    pending: Vec<f32>,
    threshold: usize,
}

impl FrameAccumulator {
    /// Create an accumulator emitting units of `threshold` samples.
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: Vec::with_capacity(threshold * 2),
            threshold,
        }
    }

    /// Append one capture frame and drain every complete send unit.
    ///
    /// A single oversized frame can complete several units at once; a small
    /// frame may complete none. Either way the leftover tail stays pending.
    pub fn push(&mut self, frame: &[f32]) -> Vec<SendUnit> {
        self.pending.extend_from_slice(frame);

        let mut units = Vec::new();
        while self.pending.len() >= self.threshold {
            units.push(self.pending.drain(..self.threshold).collect());
        }
        units
    }

    /// Number of samples waiting for the next threshold crossing.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard all pending samples. Called on session teardown.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: usize = 1600;

    #[test]
    fn test_exact_multiples_emit_exact_units() {
        // Total sample count is a multiple of the threshold: the accumulator
        // must emit exactly total/threshold units of exactly threshold samples.
        let mut acc = FrameAccumulator::new(THRESHOLD);
        let frame = vec![0.1f32; 128];

        let mut emitted = Vec::new();
        // 128 * 25 = 3200 = 2 * 1600
        for _ in 0..25 {
            emitted.extend(acc.push(&frame));
        }

        assert_eq!(emitted.len(), 2);
        for unit in &emitted {
            assert_eq!(unit.len(), THRESHOLD);
        }
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_partial_frames_preserved_across_pushes() {
        let mut acc = FrameAccumulator::new(THRESHOLD);

        assert!(acc.push(&vec![0.0f32; 1000]).is_empty());
        assert_eq!(acc.pending_len(), 1000);

        let units = acc.push(&vec![0.0f32; 1000]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].len(), THRESHOLD);
        // 2000 - 1600 = 400 samples carried into the next unit
        assert_eq!(acc.pending_len(), 400);
    }

    #[test]
    fn test_remainder_carries_sample_order() {
        let mut acc = FrameAccumulator::new(4);

        let first = acc.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(first, vec![vec![1.0, 2.0, 3.0, 4.0]]);

        let second = acc.push(&[6.0, 7.0, 8.0]);
        assert_eq!(second, vec![vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn test_oversized_frame_emits_multiple_units() {
        let mut acc = FrameAccumulator::new(THRESHOLD);
        let units = acc.push(&vec![0.5f32; THRESHOLD * 3 + 10]);

        assert_eq!(units.len(), 3);
        assert_eq!(acc.pending_len(), 10);
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut acc = FrameAccumulator::new(THRESHOLD);
        acc.push(&vec![0.2f32; 900]);
        assert_eq!(acc.pending_len(), 900);

        acc.reset();
        assert_eq!(acc.pending_len(), 0);

        // A fresh session must not inherit the old tail
        let units = acc.push(&vec![0.3f32; THRESHOLD]);
        assert_eq!(units.len(), 1);
        assert!(units[0].iter().all(|&s| s == 0.3));
    }
}
