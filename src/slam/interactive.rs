use image::GrayImage;
use log::info;

use crate::{
    config::Config,
    error::EngineError,
    slam::{results::Snapshot, system::System},
};

/// Per-frame tracker for live preview while scrubbing.
///
/// It owns its own engine and restarts it whenever the frame index does not
/// follow the previous one; repeating the last index is a no-op.
pub struct InteractiveTracker {
    config: Config,
    system: System,
    last_index: Option<u32>,
}

impl InteractiveTracker {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        Ok(Self {
            system: System::new(config.clone())?,
            config,
            last_index: None,
        })
    }

    /// Feeds the frame shown at `frame_index`.
    ///
    /// Returns `false` when the frame was the one already processed.
    pub fn update(&mut self, frame_index: u32, image: &GrayImage) -> Result<bool, EngineError> {
        if self.last_index == Some(frame_index) {
            return Ok(false);
        }
        let consecutive = match self.last_index {
            Some(last) => last.checked_add(1) == Some(frame_index),
            None => false,
        };
        if !consecutive && self.last_index.is_some() {
            info!("jump to frame {frame_index}, restarting preview tracker");
            self.system = System::new(self.config.clone())?;
        }

        self.system.track_monocular(image)?;
        self.last_index = Some(frame_index);
        Ok(true)
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn last_index(&self) -> Option<u32> {
        self.last_index
    }

    pub fn snapshot(&self) -> Snapshot {
        self.system.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frame() -> GrayImage {
        GrayImage::from_pixel(64, 48, Luma([0]))
    }

    #[test]
    fn repeated_index_is_ignored() {
        let mut tracker = InteractiveTracker::new(Config::default()).unwrap();
        assert!(tracker.update(4, &frame()).unwrap());
        assert!(!tracker.update(4, &frame()).unwrap());
        assert_eq!(tracker.system().frames_processed(), 1);
    }

    #[test]
    fn consecutive_frames_accumulate() {
        let mut tracker = InteractiveTracker::new(Config::default()).unwrap();
        for index in 10..15 {
            tracker.update(index, &frame()).unwrap();
        }
        assert_eq!(tracker.system().frames_processed(), 5);
        assert_eq!(tracker.last_index(), Some(14));
    }

    #[test]
    fn jump_restarts_the_engine() {
        let mut tracker = InteractiveTracker::new(Config::default()).unwrap();
        for index in 0..3 {
            tracker.update(index, &frame()).unwrap();
        }
        tracker.update(20, &frame()).unwrap();
        assert_eq!(tracker.system().frames_processed(), 1);
        assert_eq!(tracker.snapshot().path.len(), 1);
    }
}
