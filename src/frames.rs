//! Frames from still images on disk, for replaying recorded sessions.

use std::io;
use std::path::{Path, PathBuf};

use image::{ImageError, ImageReader, RgbImage};
use log::debug;
use thiserror::Error;

use crate::FrameSource;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to list frames in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open frame {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
}

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// PNG/JPEG files of a directory, read in file name order.
#[derive(Debug, Clone)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, FrameError> {
        let list_error = |source| FrameError::List {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(list_error)? {
            let path = entry.map_err(list_error)?.path();
            if has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        debug!("{} frames in {}", paths.len(), dir.display());
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths, next: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Frames not yet read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.paths.len() - self.next
    }
}

impl FrameSource for ImageSequence {
    type Error = FrameError;

    /// A frame that fails to load is consumed, so the next call moves on.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, Self::Error> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        load_rgb(path).map(Some)
    }
}

/// Decode an image file into RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, FrameError> {
    let reader = ImageReader::open(path).map_err(|source| FrameError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let image = reader.decode().map_err(|source| FrameError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
