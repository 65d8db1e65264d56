//! Per-turn transcript aggregation.

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The person rehearsing.
    Local,
    /// The coaching voice.
    Remote,
}

/// One finalized transcript line. Append-only and never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Accumulates partial transcription fragments for the current turn and
/// finalizes them in a fixed order on the turn-complete marker.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    local: String,
    remote: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment to the matching per-turn accumulator. Nothing is
    /// emitted until the turn completes.
    pub fn push(&mut self, speaker: Speaker, fragment: &str) {
        match speaker {
            Speaker::Local => self.local.push_str(fragment),
            Speaker::Remote => self.remote.push_str(fragment),
        }
    }

    /// Finalize the current turn. The local entry always precedes the remote
    /// entry, regardless of the order fragments arrived in; empty
    /// accumulators produce no entry. Both accumulators are reset.
    pub fn flush_turn(&mut self) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);
        if !self.local.is_empty() {
            entries.push(TranscriptEntry {
                speaker: Speaker::Local,
                text: std::mem::take(&mut self.local),
            });
        }
        if !self.remote.is_empty() {
            entries.push(TranscriptEntry {
                speaker: Speaker::Remote,
                text: std::mem::take(&mut self.remote),
            });
        }
        entries
    }

    /// Drop any partial fragments without emitting them.
    pub fn reset(&mut self) {
        self.local.clear();
        self.remote.clear();
    }
}
