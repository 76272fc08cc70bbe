//! Image supply for capture-driven stages.
//!
//! Stages only ever hold the images of the capture they are processing; a
//! source hands out owned frames on request.

use anyhow::{anyhow, Context, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of one captured frame, e.g. a path relative to a capture directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl From<&str> for ImageRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ImageRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ImageSource {
    /// Load one frame as 8-bit grayscale.
    fn fetch(&self, image: &ImageRef) -> Result<GrayImage>;
}

/// Frames stored as files under a root directory; colour files are
/// converted to luma on load.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
}

impl DirectoryImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageSource for DirectoryImageSource {
    fn fetch(&self, image: &ImageRef) -> Result<GrayImage> {
        let path = self.root.join(&image.0);
        let img = image::open(&path).with_context(|| format!("loading {}", path.display()))?;
        Ok(img.to_luma8())
    }
}

/// Frames held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryImageSource {
    images: HashMap<ImageRef, GrayImage>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<ImageRef>, image: GrayImage) {
        self.images.insert(name.into(), image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageSource for MemoryImageSource {
    fn fetch(&self, image: &ImageRef) -> Result<GrayImage> {
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| anyhow!("no image named '{image}'"))
    }
}
