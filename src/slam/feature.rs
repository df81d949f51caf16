use std::collections::{HashMap, HashSet};

use image::GrayImage;
use nalgebra::{Vector2, Vector3};

use crate::{
    algorithms::{
        corners::{block_disk, GoodFeatures, MASK_OPEN},
        optical_flow::LucasKanade,
        pyramid::Pyramid,
    },
    config::Config,
};

/// A 2D feature followed across consecutive frames
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTrack {
    pub id: u64,
    /// Position in the most recent frame it was observed in
    pub pixel: Vector2<f32>,
    pub first_pixel: Vector2<f32>,
    pub first_pose_index: u32,
    /// Frame (and pose) index of `pixel`
    pub last_pose_index: u32,
    pub resolved_3d: Option<Vector3<f32>>,
}

impl FeatureTrack {
    /// Frames between birth and the last observation
    pub fn age(&self) -> u32 {
        self.last_pose_index.saturating_sub(self.first_pose_index)
    }
}

/// Optical flow output for the tracks that were found again
#[derive(Debug, Clone, Default)]
pub struct TrackedPoints {
    pub ids: Vec<u64>,
    pub prev: Vec<Vector2<f32>>,
    pub curr: Vec<Vector2<f32>>,
}

impl TrackedPoints {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Active tracks stored densely with an id index, so lookups and removals are O(1)
#[derive(Debug, Clone, Default)]
pub struct FeatureTrackSet {
    tracks: Vec<FeatureTrack>,
    index: HashMap<u64, usize>,
    next_id: u64,
}

impl FeatureTrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureTrack> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FeatureTrack> {
        self.tracks.iter_mut()
    }

    pub fn get(&self, id: u64) -> Option<&FeatureTrack> {
        self.index.get(&id).map(|&i| &self.tracks[i])
    }

    /// Follows every active track from `prev` into `curr`.
    ///
    /// Returns only the tracks that were found; nothing is removed here. With
    /// fewer than `min_track_points` active tracks no flow is computed at all.
    pub fn track(&self, prev: &Pyramid, curr: &Pyramid, config: &Config) -> TrackedPoints {
        if self.tracks.len() < config.min_track_points {
            return TrackedPoints::default();
        }

        let points: Vec<Vector2<f32>> = self.tracks.iter().map(|t| t.pixel).collect();
        let flow = LucasKanade::new(&config.flow).track(prev, curr, &points);

        let mut tracked = TrackedPoints::default();
        for ((track, result), prev_pixel) in self.tracks.iter().zip(flow).zip(points) {
            if result.found() {
                tracked.ids.push(track.id);
                tracked.prev.push(prev_pixel);
                tracked.curr.push(result.position);
            }
        }
        tracked
    }

    /// Moves a surviving track to its new observation.
    pub fn update(&mut self, id: u64, pixel: Vector2<f32>, frame_index: u32) -> bool {
        match self.index.get(&id) {
            Some(&i) => {
                let track = &mut self.tracks[i];
                track.pixel = pixel;
                track.last_pose_index = frame_index;
                true
            }
            None => false,
        }
    }

    /// Detects new corners away from the active tracks, up to `max_active_pts` in total.
    ///
    /// Returns the number of tracks born.
    pub fn replenish(&mut self, image: &GrayImage, frame_index: u32, config: &Config) -> usize {
        let budget = config.max_active_pts.saturating_sub(self.tracks.len());
        if budget == 0 {
            return 0;
        }

        let (width, height) = image.dimensions();
        let mut mask = GrayImage::from_pixel(width, height, MASK_OPEN);
        for track in &self.tracks {
            block_disk(&mut mask, track.pixel.x, track.pixel.y, config.min_distance);
        }

        let detector = GoodFeatures {
            max_corners: budget,
            quality_level: config.quality_level,
            min_distance: config.min_distance,
        };
        let corners = detector.detect(image, &mut mask);
        let born = corners.len();
        for corner in corners {
            self.insert(Vector2::new(corner.x, corner.y), frame_index);
        }
        born
    }

    /// Removes every track whose id is not in `keep_ids`, handing each one to `on_drop`.
    ///
    /// Returns the number of dropped tracks.
    pub fn prune<F>(&mut self, keep_ids: &HashSet<u64>, mut on_drop: F) -> usize
    where
        F: FnMut(FeatureTrack),
    {
        let dropped: Vec<u64> = self
            .tracks
            .iter()
            .map(|t| t.id)
            .filter(|id| !keep_ids.contains(id))
            .collect();

        for &id in &dropped {
            if let Some(track) = self.remove(id) {
                on_drop(track);
            }
        }
        dropped.len()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.index.clear();
    }

    pub(crate) fn insert(&mut self, pixel: Vector2<f32>, frame_index: u32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.index.insert(id, self.tracks.len());
        self.tracks.push(FeatureTrack {
            id,
            pixel,
            first_pixel: pixel,
            first_pose_index: frame_index,
            last_pose_index: frame_index,
            resolved_3d: None,
        });
        id
    }

    fn remove(&mut self, id: u64) -> Option<FeatureTrack> {
        let i = self.index.remove(&id)?;
        let track = self.tracks.swap_remove(i);
        // the former last element now lives at `i`
        if let Some(moved) = self.tracks.get(i) {
            self.index.insert(moved.id, i);
        }
        Some(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn assert_index_consistent(set: &FeatureTrackSet) {
        assert_eq!(set.index.len(), set.tracks.len());
        for (i, track) in set.tracks.iter().enumerate() {
            assert_eq!(set.index[&track.id], i);
        }
    }

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            Luma([if (x / cell + y / cell) % 2 == 0 { 40 } else { 210 }])
        })
    }

    #[test]
    fn prune_hands_dropped_tracks_over() {
        let mut set = FeatureTrackSet::new();
        for i in 0..6 {
            set.insert(Vector2::new(i as f32, 0.0), 0);
        }

        let keep: HashSet<u64> = [1, 4].into_iter().collect();
        let mut dropped = Vec::new();
        let count = set.prune(&keep, |track| dropped.push(track.id));

        assert_eq!(count, 4);
        dropped.sort_unstable();
        assert_eq!(dropped, vec![0, 2, 3, 5]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(4).map(|t| t.pixel.x), Some(4.0));
        assert_index_consistent(&set);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut set = FeatureTrackSet::new();
        let a = set.insert(Vector2::zeros(), 0);
        set.prune(&HashSet::new(), |_| {});
        let b = set.insert(Vector2::zeros(), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn update_moves_pixel_and_keeps_birth() {
        let mut set = FeatureTrackSet::new();
        let id = set.insert(Vector2::new(5.0, 5.0), 2);
        assert!(set.update(id, Vector2::new(6.5, 4.0), 3));
        assert!(!set.update(id + 1, Vector2::zeros(), 3));

        let track = set.get(id).unwrap();
        assert_eq!(track.first_pixel, Vector2::new(5.0, 5.0));
        assert_eq!(track.pixel, Vector2::new(6.5, 4.0));
        assert_eq!(track.age(), 1);
    }

    #[test]
    fn replenish_respects_budget_and_spacing() {
        let config = Config {
            max_active_pts: 20,
            min_distance: 10,
            ..Config::default()
        };
        let image = checkerboard(128, 16);
        let mut set = FeatureTrackSet::new();

        let born = set.replenish(&image, 0, &config);
        assert!(born > 0 && born <= 20);
        assert_eq!(set.len(), born);
        assert!(set.iter().all(|t| t.first_pose_index == 0 && t.resolved_3d.is_none()));

        // a second pass only adds corners clear of the existing ones
        let before: Vec<_> = set.iter().map(|t| t.pixel).collect();
        set.replenish(&image, 1, &config);
        assert!(set.len() <= 20);
        for track in set.iter().filter(|t| t.first_pose_index == 1) {
            for old in &before {
                assert!((track.pixel - old).norm() > 9.0);
            }
        }
        assert_index_consistent(&set);
    }

    #[test]
    fn too_few_tracks_skip_flow() {
        let config = Config::default();
        let image = checkerboard(64, 8);
        let pyramid = Pyramid::build(&image, 2);
        let mut set = FeatureTrackSet::new();
        for i in 0..(config.min_track_points - 1) {
            set.insert(Vector2::new(8.0 + i as f32 * 4.0, 8.0), 0);
        }
        assert!(set.track(&pyramid, &pyramid, &config).is_empty());
    }
}
