//! Frame relay
//!
//! The single latest-frame slot between capture and renderer. The slot holds
//! one `Arc` handle and readers clone it under the same short lock, so a
//! frame is observed whole or not at all, and at most one previous frame is
//! kept alive by the relay itself.

use crate::hardware::VideoFrame;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub struct FrameRelay {
    latest: Mutex<Option<Arc<VideoFrame>>>,
}

impl FrameRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held frame. The displaced handle drops after the lock is
    /// released.
    pub fn install(&self, frame: Arc<VideoFrame>) {
        let previous = self.latest.lock().replace(frame);
        drop(previous);
    }

    /// Most recent frame, if any arrived since the last clear.
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.latest.lock().clone()
    }

    pub fn clear(&self) {
        self.latest.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(seq: u64, width: u32) -> Arc<VideoFrame> {
        Arc::new(VideoFrame {
            data: vec![seq as u8; (width * width * 4) as usize],
            width,
            height: width,
            pts: Duration::from_millis(seq),
            epoch: 1,
        })
    }

    #[test]
    fn test_install_replaces_and_latest_clones() {
        let relay = FrameRelay::new();
        assert!(relay.latest().is_none());

        relay.install(frame(1, 2));
        relay.install(frame(2, 2));
        let latest = relay.latest().unwrap();
        assert_eq!(latest.pts, Duration::from_millis(2));

        relay.clear();
        assert!(relay.latest().is_none());
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_frames() {
        let relay = Arc::new(FrameRelay::new());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let relay = relay.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut seq = 0u64;
                while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                    // Alternate sizes so a blended read would be detectable.
                    let width = if seq % 2 == 0 { 2 } else { 4 };
                    relay.install(frame(seq, width));
                    seq += 1;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let relay = relay.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        if let Some(frame) = relay.latest() {
                            let expected =
                                (frame.width * frame.height * 4) as usize;
                            assert_eq!(frame.data.len(), expected);
                        }
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(100));
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
