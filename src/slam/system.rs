use std::collections::HashSet;

use image::GrayImage;
use log::{debug, info, warn};

use crate::{
    algorithms::{camera::PinholeCamera, pyramid::Pyramid},
    config::Config,
    error::EngineError,
    slam::{
        adaptive::AdaptiveController,
        feature::FeatureTrackSet,
        pose::{Pose, PoseIntegrator},
        tracker::MotionEstimator,
        triangulator::Triangulator,
        voxel_map::{MapPoint, VoxelMap},
    },
};

/// What happened to a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u32,
    /// Tracks found again by optical flow
    pub tracked: usize,
    /// Tracks that survived the motion estimate
    pub inliers: usize,
    pub dropped: usize,
    pub born: usize,
    pub triangulated: usize,
    pub scene_lost: bool,
}

/// Monocular odometry and sparse mapping engine.
///
/// Frames go in strictly in order through [`System::track_monocular`]; exactly
/// one pose is appended per frame, including frames where tracking collapsed.
pub struct System {
    pub(crate) config: Config,
    pub(crate) camera: Option<PinholeCamera>,
    pub(crate) tracks: FeatureTrackSet,
    motion: MotionEstimator,
    pub(crate) poses: PoseIntegrator,
    pub(crate) triangulator: Triangulator,
    pub(crate) map: VoxelMap,
    controller: AdaptiveController,
    last_pyramid: Option<Pyramid>,
    pub(crate) scene_loss_marks: Vec<u32>,
    pub(crate) frames_processed: u32,
    /// Tracks ever handed to the triangulator
    pub(crate) lost_tracks: u64,
    pub(crate) last_relative: Pose,
    pub(crate) last_point: Option<MapPoint>,
}

impl System {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        info!(
            "starting session: fov {}°, {} tracks max",
            config.fov_deg, config.max_active_pts
        );
        Ok(Self {
            motion: MotionEstimator::new(&config),
            triangulator: Triangulator::new(&config),
            map: VoxelMap::new(config.voxel_size),
            camera: None,
            tracks: FeatureTrackSet::new(),
            poses: PoseIntegrator::new(),
            controller: AdaptiveController,
            last_pyramid: None,
            scene_loss_marks: Vec::new(),
            frames_processed: 0,
            lost_tracks: 0,
            last_relative: Pose::identity(),
            last_point: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Intrinsics, known once the first frame fixed the resolution
    pub fn camera(&self) -> Option<&PinholeCamera> {
        self.camera.as_ref()
    }

    pub fn frames_processed(&self) -> u32 {
        self.frames_processed
    }

    pub fn tracks(&self) -> &FeatureTrackSet {
        &self.tracks
    }

    pub fn map(&self) -> &VoxelMap {
        &self.map
    }

    pub fn poses(&self) -> &PoseIntegrator {
        &self.poses
    }

    /// Camera-to-world pose of an already processed frame
    pub fn pose_at(&self, frame_index: u32) -> Option<&Pose> {
        self.poses.pose_at(frame_index)
    }

    pub fn scene_loss_marks(&self) -> &[u32] {
        &self.scene_loss_marks
    }

    /// Processes the next frame of the sequence.
    ///
    /// Errors leave the engine untouched; tracking failures are not errors but
    /// scene-loss marks with an identity motion.
    pub fn track_monocular(&mut self, image: &GrayImage) -> Result<FrameReport, EngineError> {
        let camera = self.camera_for(image)?;
        let frame_index = self.frames_processed;
        let pyramid = Pyramid::build(image, self.config.flow.pyramid_levels as usize);

        let mut report = FrameReport {
            frame_index,
            tracked: 0,
            inliers: 0,
            dropped: 0,
            born: 0,
            triangulated: 0,
            scene_lost: false,
        };

        match self.last_pyramid.take() {
            Some(prev) => {
                let tracked = self.tracks.track(&prev, &pyramid, &self.config);
                report.tracked = tracked.len();

                let (relative, keep) = match self.motion.estimate(&tracked.prev, &tracked.curr, &camera) {
                    Ok(estimate) => {
                        let mut keep = HashSet::with_capacity(tracked.len());
                        for ((&id, &pixel), &inlier) in
                            tracked.ids.iter().zip(&tracked.curr).zip(&estimate.inlier_mask)
                        {
                            if inlier {
                                self.tracks.update(id, pixel, frame_index);
                                keep.insert(id);
                            }
                        }
                        (estimate.relative, keep)
                    }
                    Err(reason) => {
                        warn!("frame {frame_index}: tracking lost ({reason})");
                        self.scene_loss_marks.push(frame_index);
                        report.scene_lost = true;
                        (Pose::identity(), HashSet::new())
                    }
                };
                report.inliers = keep.len();

                self.poses.integrate(&relative);
                self.last_relative = relative;

                let (triangulated, dropped) = self.retire_tracks(&keep, frame_index, &camera);
                report.triangulated = triangulated;
                report.dropped = dropped;
                report.triangulated += self.triangulate_live(frame_index, &camera);
            }
            None => {
                self.poses.integrate(&Pose::identity());
            }
        }

        report.born = self.tracks.replenish(image, frame_index, &self.config);
        if frame_index == 0 && self.tracks.len() < self.config.min_features {
            warn!(
                "frame 0: only {} features, scene not trackable",
                self.tracks.len()
            );
            self.scene_loss_marks.push(frame_index);
            report.scene_lost = true;
        }

        self.controller
            .update(&mut self.config, self.tracks.len(), self.triangulator.stats());
        self.last_pyramid = Some(pyramid);
        self.frames_processed += 1;

        debug!(
            "frame {frame_index}: {} tracked, {} inliers, {} born, {} active, {} in map",
            report.tracked,
            report.inliers,
            report.born,
            self.tracks.len(),
            self.map.len()
        );
        Ok(report)
    }

    /// Intrinsics for `image`, fixing them on the first frame
    fn camera_for(&mut self, image: &GrayImage) -> Result<PinholeCamera, EngineError> {
        let found = image.dimensions();
        if found.0 == 0 || found.1 == 0 {
            return Err(EngineError::EmptyFrame(found));
        }
        match self.camera {
            Some(camera) if (camera.width, camera.height) != found => Err(EngineError::FrameSize {
                expected: (camera.width, camera.height),
                found,
            }),
            Some(camera) => Ok(camera),
            None => {
                let camera = PinholeCamera::from_fov(found.0, found.1, self.config.fov_deg);
                debug!("intrinsics for {}x{}: f = {:.1}", found.0, found.1, camera.focal());
                self.camera = Some(camera);
                Ok(camera)
            }
        }
    }

    /// Drops every track not in `keep`, giving each one a last chance to become a map point.
    fn retire_tracks(
        &mut self,
        keep: &HashSet<u64>,
        frame_index: u32,
        camera: &PinholeCamera,
    ) -> (usize, usize) {
        let triangulator = &mut self.triangulator;
        let map = &mut self.map;
        let poses = &self.poses;
        let config = &self.config;
        let last_point = &mut self.last_point;

        let mut triangulated = 0;
        let dropped = self.tracks.prune(keep, |track| {
            // already committed while it was alive
            if track.resolved_3d.is_some() {
                return;
            }
            if let Ok(point) = triangulator.attempt(&track, frame_index, poses, camera, config) {
                map.insert(point);
                *last_point = Some(point);
                triangulated += 1;
            }
        });
        self.lost_tracks += dropped as u64;
        (triangulated, dropped)
    }

    /// One attempt for live tracks reaching `live_triangulation_age`, if enabled
    fn triangulate_live(&mut self, frame_index: u32, camera: &PinholeCamera) -> usize {
        let Some(live_age) = self.config.live_triangulation_age else {
            return 0;
        };

        let mut triangulated = 0;
        for track in self.tracks.iter_mut() {
            if track.resolved_3d.is_some()
                || track.last_pose_index != frame_index
                || track.age() != live_age
            {
                continue;
            }
            if let Ok(point) = self
                .triangulator
                .attempt(track, frame_index, &self.poses, camera, &self.config)
            {
                track.resolved_3d = Some(point.position);
                self.map.insert(point);
                self.last_point = Some(point);
                triangulated += 1;
            }
        }
        triangulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn black_frames_are_scene_loss() {
        let mut system = System::new(Config::default()).unwrap();
        let black = GrayImage::from_pixel(160, 120, Luma([0]));
        for _ in 0..10 {
            let report = system.track_monocular(&black).unwrap();
            assert!(report.scene_lost);
            assert_eq!(report.born, 0);
        }
        assert_eq!(system.poses().len(), 10);
        assert_eq!(system.scene_loss_marks(), (0..10).collect::<Vec<_>>().as_slice());
        assert!(system.tracks().is_empty());
        assert!(system
            .poses()
            .poses()
            .iter()
            .all(|pose| *pose == Pose::identity()));
    }

    #[test]
    fn mismatched_frame_is_rejected_without_side_effects() {
        let mut system = System::new(Config::default()).unwrap();
        system
            .track_monocular(&GrayImage::from_pixel(160, 120, Luma([0])))
            .unwrap();

        let result = system.track_monocular(&GrayImage::from_pixel(80, 60, Luma([0])));
        assert!(matches!(
            result,
            Err(EngineError::FrameSize {
                expected: (160, 120),
                found: (80, 60)
            })
        ));
        assert_eq!(system.frames_processed(), 1);
        assert_eq!(system.poses().len(), 1);
    }

    #[test]
    fn live_triangulation_commits_once() {
        let config = Config {
            live_triangulation_age: Some(6),
            ..Config::default()
        };
        let camera = PinholeCamera::from_fov(640, 480, 90.0);
        let mut system = System::new(config).unwrap();
        system.camera = Some(camera);

        // camera sliding along +x
        system.poses.integrate(&Pose::identity());
        let step = Pose::from_parts(&nalgebra::Matrix3::identity(), &nalgebra::Vector3::new(0.2, 0.0, 0.0));
        for _ in 1..=6 {
            system.poses.integrate(&step);
        }
        let pixel = |index: u32, point: &nalgebra::Vector3<f64>| {
            let local = system.poses.pose_at(index).unwrap().world_to_camera(point).unwrap();
            camera.project(&local).unwrap().cast::<f32>()
        };

        let point = nalgebra::Vector3::new(1.0, 0.2, 8.0);
        let (first, last) = (pixel(0, &point), pixel(6, &point));
        let young_point = nalgebra::Vector3::new(-1.0, 0.0, 9.0);
        let (young_first, young_last) = (pixel(2, &young_point), pixel(6, &young_point));

        let mature = system.tracks.insert(first, 0);
        system.tracks.update(mature, last, 6);
        let young = system.tracks.insert(young_first, 2);
        system.tracks.update(young, young_last, 6);

        assert_eq!(system.triangulate_live(6, &camera), 1);
        let resolved = system.tracks.get(mature).unwrap().resolved_3d.unwrap();
        assert!((resolved - point.cast::<f32>()).norm() < 0.05);
        assert!(system.tracks.get(young).unwrap().resolved_3d.is_none());
        assert_eq!(system.map.len(), 1);
        assert_eq!(system.triangulator.stats().len(), 1);

        // a second pass at the same frame does not commit the track again
        assert_eq!(system.triangulate_live(6, &camera), 0);

        // dropping both: the committed track is skipped, the young one is too young
        let (triangulated, dropped) = system.retire_tracks(&HashSet::new(), 6, &camera);
        assert_eq!((triangulated, dropped), (0, 2));
        assert_eq!(system.map.len(), 1);
        assert_eq!(system.triangulator.stats().len(), 1);
        assert_eq!(system.lost_tracks, 2);
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = Config {
            voxel_size: 0.0,
            ..Config::default()
        };
        assert!(matches!(System::new(config), Err(EngineError::Config(_))));
    }
}
