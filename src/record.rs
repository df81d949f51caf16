use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{error::RecordError, slam::results::Snapshot};

/// Bumped whenever the layout or the meaning of a stored record changes
pub const RECORD_VERSION: u32 = 4;

/// Persisted outcome of a batch run.
///
/// Records of another version are never migrated: loading one behaves as if
/// nothing had been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub version: u32,
    /// `(x, z, yaw)` per frame
    pub path: Vec<[f32; 3]>,
    /// `(x, z, age)` per map point
    pub point_cloud: Vec<[f32; 3]>,
    pub scene_loss_marks: Vec<u32>,
    /// Sorted, disjoint, inclusive frame ranges
    pub analyzed_ranges: Vec<(u32, u32)>,
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<u32>,
}

impl Default for TrackRecord {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            path: Vec::new(),
            point_cloud: Vec::new(),
            scene_loss_marks: Vec::new(),
            analyzed_ranges: Vec::new(),
        }
    }
}

impl From<&Snapshot> for TrackRecord {
    fn from(snapshot: &Snapshot) -> Self {
        let mut record = Self {
            path: snapshot.path.clone(),
            point_cloud: snapshot.point_cloud.clone(),
            scene_loss_marks: snapshot.scene_loss_marks.clone(),
            ..Self::default()
        };
        if let Some(range) = snapshot.analyzed_range {
            record.add_range(range);
        }
        record
    }
}

impl TrackRecord {
    /// Adds an inclusive range, merging it with overlapping or adjacent ones.
    pub fn add_range(&mut self, range: (u32, u32)) {
        let (mut start, mut end) = (range.0.min(range.1), range.0.max(range.1));
        let mut merged = Vec::with_capacity(self.analyzed_ranges.len() + 1);
        for &(s, e) in &self.analyzed_ranges {
            if e.saturating_add(1) < start || end.saturating_add(1) < s {
                merged.push((s, e));
            } else {
                start = start.min(s);
                end = end.max(e);
            }
        }
        merged.push((start, end));
        merged.sort_unstable();
        self.analyzed_ranges = merged;
    }

    pub fn covers(&self, frame_index: u32) -> bool {
        self.analyzed_ranges
            .iter()
            .any(|&(s, e)| (s..=e).contains(&frame_index))
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a stored record, `None` when it carries another version.
    pub fn from_json(text: &str) -> Result<Option<Self>, RecordError> {
        let header: VersionHeader = serde_json::from_str(text)?;
        if header.version != Some(RECORD_VERSION) {
            warn!(
                "discarding tracking record of version {:?}, expected {RECORD_VERSION}",
                header.version
            );
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(text)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RecordError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("tracking record written to {}", path.display());
        Ok(())
    }

    /// Loads a record, `None` when the file is missing or stale.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, RecordError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RecordError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_json(&text)
    }
}
