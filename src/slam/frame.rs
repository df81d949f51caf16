use std::path::{Path, PathBuf};

use image::GrayImage;
use log::debug;

use crate::error::SourceError;

/// Ordered supply of grayscale frames
pub trait FrameSource {
    /// Resolution of every frame, if known up front
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Total number of frames, if known up front
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// The next frame, `Ok(None)` at end of stream
    fn next_frame(&mut self) -> Result<Option<GrayImage>, SourceError>;
}

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Still images of a directory, in file name order
#[derive(Debug, Clone)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    cursor: usize,
    dimensions: Option<(u32, u32)>,
}

impl ImageSequence {
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, SourceError> {
        let directory = directory.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(SourceError::NoFrames(directory.to_path_buf()));
        }
        paths.sort();
        debug!("{} frames in {}", paths.len(), directory.display());

        let dimensions = image::image_dimensions(&paths[0]).ok();
        Ok(Self {
            paths,
            cursor: 0,
            dimensions,
        })
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            dimensions: paths
                .first()
                .and_then(|p| image::image_dimensions(p).ok()),
            paths,
            cursor: 0,
        }
    }
}

impl FrameSource for ImageSequence {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }

    fn next_frame(&mut self) -> Result<Option<GrayImage>, SourceError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let frame = image::open(path)
            .map_err(|source| SourceError::Decode {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        self.cursor += 1;
        Ok(Some(frame))
    }
}

/// Frames already decoded in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryFrames {
    frames: std::collections::VecDeque<GrayImage>,
    dimensions: Option<(u32, u32)>,
}

impl InMemoryFrames {
    pub fn new(frames: Vec<GrayImage>) -> Self {
        Self {
            dimensions: frames.first().map(|f| f.dimensions()),
            frames: frames.into(),
        }
    }
}

impl FrameSource for InMemoryFrames {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn next_frame(&mut self) -> Result<Option<GrayImage>, SourceError> {
        Ok(self.frames.pop_front())
    }
}
