//! Outbound audio capture pipeline.
//!
//! Converts captured float chunks into PCM16 wire frames and forwards them
//! to the session link. Forwarding is fire-and-forget: a lost frame degrades
//! quality, it never stalls capture.

use crate::engine::CaptureChunk;
use crate::pcm;
use crate::transport::{OutboundAudioFrame, SessionLink};

#[derive(Debug, Default)]
pub struct CapturePipeline {
    frames_forwarded: u64,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, link: &dyn SessionLink, chunk: &CaptureChunk) {
        link.send_frame(OutboundAudioFrame {
            payload: pcm::encode(&chunk.samples),
        });
        self.frames_forwarded += 1;
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    struct RecordingLink {
        sent: Arc<Mutex<Vec<Bytes>>>,
    }

    impl SessionLink for RecordingLink {
        fn send_frame(&self, frame: OutboundAudioFrame) {
            self.sent.lock().unwrap().push(frame.payload);
        }

        fn close(&mut self) {}
    }

    #[test]
    fn forwards_encoded_wire_bytes() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let link = RecordingLink { sent: sent.clone() };
        let mut pipeline = CapturePipeline::new();

        let chunk = CaptureChunk {
            samples: vec![0.0, 0.5, -1.0],
        };
        pipeline.forward(&link, &chunk);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].as_ref(), &[0x00, 0x00, 0x00, 0x40, 0x00, 0x80]);
        assert_eq!(pipeline.frames_forwarded(), 1);
    }
}
