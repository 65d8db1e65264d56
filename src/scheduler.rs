//! Gapless playback scheduling.
//!
//! The playback cursor is a running end-time estimate on the output clock.
//! Each inbound chunk is scheduled at `max(cursor, now)`: back-to-back when
//! chunks arrive faster than playback, immediate when they arrive with a
//! gap. The cursor is never allowed to run more than a configured lookahead
//! ahead of the clock, which bounds buffered-but-unplayed audio during
//! bursts.

use std::collections::HashSet;

use tracing::warn;

use crate::engine::{OutputContext, SourceId};
use crate::error::EngineError;
use crate::transport::InboundAudioChunk;

/// Default maximum distance, in seconds, the cursor may run ahead of the
/// output clock before chunks are dropped.
pub const DEFAULT_MAX_LOOKAHEAD: f64 = 30.0;

#[derive(Debug)]
pub struct PlaybackScheduler {
    cursor: f64,
    active: HashSet<SourceId>,
    max_lookahead: f64,
}

impl PlaybackScheduler {
    pub fn new(max_lookahead: f64) -> Self {
        Self {
            cursor: 0.0,
            active: HashSet::new(),
            max_lookahead,
        }
    }

    /// Decode and schedule one inbound chunk.
    ///
    /// A malformed payload is dropped with a diagnostic and leaves the
    /// cursor untouched; only a scheduling failure in the engine is fatal.
    pub fn on_chunk(
        &mut self,
        output: &mut dyn OutputContext,
        chunk: InboundAudioChunk,
    ) -> Result<(), EngineError> {
        let buffer = match output.decode(&chunk.payload, chunk.sample_rate, chunk.channels) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("dropping malformed audio chunk: {e}");
                return Ok(());
            }
        };

        let now = output.now();
        let start = self.cursor.max(now);
        if start - now > self.max_lookahead {
            warn!(
                "dropping audio chunk, cursor {:.2}s ahead of output clock (max {:.0}s)",
                start - now,
                self.max_lookahead
            );
            return Ok(());
        }

        let duration = buffer.duration();
        let id = output.schedule(buffer, start)?;
        self.cursor = start + duration;
        self.active.insert(id);
        Ok(())
    }

    /// Deregister a source that finished playing naturally.
    pub fn on_complete(&mut self, id: SourceId) {
        self.active.remove(&id);
    }

    /// Force-stop every registered source, clear the set and reset the
    /// cursor to zero.
    pub fn stop_all(&mut self, output: &mut dyn OutputContext) {
        for id in self.active.drain() {
            output.stop_source(id);
        }
        self.cursor = 0.0;
    }

    /// Reset without an output context, for a fresh session.
    pub fn reset(&mut self) {
        self.active.clear();
        self.cursor = 0.0;
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_sources(&self) -> usize {
        self.active.len()
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOOKAHEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AudioBuffer;
    use crate::error::DecodeError;
    use crate::pcm;
    use bytes::Bytes;

    /// Output context with a hand-cranked clock.
    struct TestOutput {
        now: f64,
        next_id: u64,
        scheduled: Vec<(SourceId, f64, f64)>,
        stopped: Vec<SourceId>,
    }

    impl TestOutput {
        fn new() -> Self {
            Self {
                now: 0.0,
                next_id: 0,
                scheduled: Vec::new(),
                stopped: Vec::new(),
            }
        }
    }

    impl OutputContext for TestOutput {
        fn now(&self) -> f64 {
            self.now
        }

        fn decode(
            &self,
            payload: &[u8],
            sample_rate: u32,
            channels: u16,
        ) -> Result<AudioBuffer, DecodeError> {
            Ok(AudioBuffer {
                samples: pcm::decode(payload)?,
                sample_rate,
                channels,
            })
        }

        fn schedule(&mut self, buffer: AudioBuffer, at: f64) -> Result<SourceId, EngineError> {
            let id = SourceId(self.next_id);
            self.next_id += 1;
            self.scheduled.push((id, at, buffer.duration()));
            Ok(id)
        }

        fn stop_source(&mut self, id: SourceId) {
            self.stopped.push(id);
        }

        fn close(&mut self) {}
    }

    /// A chunk of `frames` samples at 1000 Hz mono, i.e. `frames` ms.
    fn chunk(frames: usize) -> InboundAudioChunk {
        InboundAudioChunk {
            payload: pcm::encode(&vec![0.1; frames]),
            sample_rate: 1000,
            channels: 1,
        }
    }

    #[test]
    fn consecutive_chunks_schedule_back_to_back() {
        let mut output = TestOutput::new();
        let mut sched = PlaybackScheduler::default();

        sched.on_chunk(&mut output, chunk(500)).unwrap();
        // Second chunk arrives before the first ends.
        output.now = 0.1;
        sched.on_chunk(&mut output, chunk(250)).unwrap();

        assert_eq!(output.scheduled[0].1, 0.0);
        assert_eq!(output.scheduled[1].1, 0.5); // exactly at the first end
        assert!((sched.cursor() - 0.75).abs() < 1e-9);
        assert_eq!(sched.active_sources(), 2);
    }

    #[test]
    fn late_chunk_starts_at_current_clock() {
        let mut output = TestOutput::new();
        let mut sched = PlaybackScheduler::default();

        sched.on_chunk(&mut output, chunk(100)).unwrap();
        // Arrives well after the first buffer finished: cursor catches up.
        output.now = 2.0;
        sched.on_chunk(&mut output, chunk(100)).unwrap();

        assert_eq!(output.scheduled[1].1, 2.0);
        assert!((sched.cursor() - 2.1).abs() < 1e-9);
    }

    #[test]
    fn burst_beyond_lookahead_is_dropped() {
        let mut output = TestOutput::new();
        let mut sched = PlaybackScheduler::new(1.0);

        sched.on_chunk(&mut output, chunk(600)).unwrap();
        sched.on_chunk(&mut output, chunk(600)).unwrap();
        // Cursor is now 1.2s ahead of a clock stuck at 0: drop.
        sched.on_chunk(&mut output, chunk(600)).unwrap();

        assert_eq!(output.scheduled.len(), 2);
        assert!((sched.cursor() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn malformed_chunk_leaves_cursor_untouched() {
        let mut output = TestOutput::new();
        let mut sched = PlaybackScheduler::default();

        sched.on_chunk(&mut output, chunk(100)).unwrap();
        let bad = InboundAudioChunk {
            payload: Bytes::from_static(&[0x01]),
            sample_rate: 1000,
            channels: 1,
        };
        sched.on_chunk(&mut output, bad).unwrap();

        assert_eq!(output.scheduled.len(), 1);
        assert!((sched.cursor() - 0.1).abs() < 1e-9);
        assert_eq!(sched.active_sources(), 1);
    }

    #[test]
    fn completion_deregisters_exactly_once() {
        let mut output = TestOutput::new();
        let mut sched = PlaybackScheduler::default();

        sched.on_chunk(&mut output, chunk(100)).unwrap();
        let id = output.scheduled[0].0;
        sched.on_complete(id);
        assert_eq!(sched.active_sources(), 0);
        // A duplicate completion is harmless.
        sched.on_complete(id);
        assert_eq!(sched.active_sources(), 0);
    }

    #[test]
    fn stop_all_halts_sources_and_resets_cursor() {
        let mut output = TestOutput::new();
        let mut sched = PlaybackScheduler::default();

        sched.on_chunk(&mut output, chunk(100)).unwrap();
        sched.on_chunk(&mut output, chunk(100)).unwrap();
        sched.stop_all(&mut output);

        assert_eq!(output.stopped.len(), 2);
        assert_eq!(sched.active_sources(), 0);
        assert_eq!(sched.cursor(), 0.0);
    }
}
