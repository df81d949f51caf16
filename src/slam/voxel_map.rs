use std::collections::HashMap;

use nalgebra::Vector3;

/// A triangulated landmark
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    pub position: Vector3<f32>,
    /// Frames the track lived before it was triangulated
    pub age: u32,
    /// Baseline over depth at triangulation time; higher is better conditioned
    pub quality_ratio: f32,
}

/// Ground-plane cell, `(floor(x / size), floor(z / size))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelKey(pub i64, pub i64);

impl VoxelKey {
    pub fn of(position: &Vector3<f32>, voxel_size: f64) -> Self {
        Self(
            (position.x as f64 / voxel_size).floor() as i64,
            (position.z as f64 / voxel_size).floor() as i64,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The cell was empty
    Inserted,
    /// The point beat the one already in its cell
    Replaced,
    /// The cell already holds a point at least as good
    Discarded,
}

/// Sparse map keeping the best point of every ground-plane cell.
///
/// Points are never merged or removed, only replaced by a strictly better one.
#[derive(Debug, Clone)]
pub struct VoxelMap {
    voxel_size: f64,
    points: Vec<MapPoint>,
    index: HashMap<VoxelKey, usize>,
}

impl VoxelMap {
    pub fn new(voxel_size: f64) -> Self {
        Self {
            voxel_size,
            points: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, point: MapPoint) -> InsertOutcome {
        let key = VoxelKey::of(&point.position, self.voxel_size);
        match self.index.get(&key) {
            None => {
                self.index.insert(key, self.points.len());
                self.points.push(point);
                InsertOutcome::Inserted
            }
            Some(&i) if point.quality_ratio > self.points[i].quality_ratio => {
                self.points[i] = point;
                InsertOutcome::Replaced
            }
            Some(_) => InsertOutcome::Discarded,
        }
    }

    pub fn get(&self, key: VoxelKey) -> Option<&MapPoint> {
        self.index.get(&key).map(|&i| &self.points[i])
    }

    pub fn points(&self) -> &[MapPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }
}
