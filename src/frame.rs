//! Latest-frame cache for the video stream.
//!
//! The processing loop owns the only [`FrameWriter`]. HTTP stream handlers
//! hold [`FrameReader`] clones and always see the last complete frame.

use std::sync::{Arc, Mutex, PoisonError};

/// One encoded JPEG frame and its publish sequence number.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub jpeg: Arc<[u8]>,
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<PublishedFrame>,
    next_sequence: u64,
}

/// Unique write side; not `Clone`.
#[derive(Debug)]
pub struct FrameWriter {
    slot: Arc<Mutex<Slot>>,
}

#[derive(Clone, Debug)]
pub struct FrameReader {
    slot: Arc<Mutex<Slot>>,
}

/// Creates an empty buffer.
pub fn frame_buffer() -> (FrameWriter, FrameReader) {
    let slot = Arc::new(Mutex::new(Slot::default()));
    (
        FrameWriter {
            slot: Arc::clone(&slot),
        },
        FrameReader { slot },
    )
}

impl FrameWriter {
    /// Replaces the cached frame and returns its sequence number.
    pub fn publish(&mut self, jpeg: Vec<u8>) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.next_sequence += 1;
        let sequence = slot.next_sequence;
        slot.latest = Some(PublishedFrame {
            sequence,
            jpeg: Arc::from(jpeg),
        });
        sequence
    }
}

impl FrameReader {
    /// Last published frame, or `None` before the first publish.
    pub fn latest(&self) -> Option<PublishedFrame> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_latest_complete_frame() {
        let (mut writer, reader) = frame_buffer();
        assert!(reader.latest().is_none());

        writer.publish(vec![1, 2, 3]);
        let second = reader.clone();
        assert_eq!(writer.publish(vec![4, 5]), 2);

        let frame = second.latest().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(&*frame.jpeg, &[4, 5]);
        assert_eq!(reader.latest().unwrap().sequence, 2);
    }
}
