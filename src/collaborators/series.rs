//! Slice file formats for the series reader.
//!
//! Formats are looked up by tag in a [`SliceFormatRegistry`] that the caller
//! builds and passes to reader construction. The only built-in format is
//! JSON: `{ "size": [..], "spacing": [..], "pixels": [..] }` with pixels in
//! buffer order (axis 0 fastest).

use crate::image::Image;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::region::{Region, MAX_DIMENSIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Extent and spacing of one slice, read without its pixels where the
/// format allows.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceInfo {
    pub size: Vec<usize>,
    pub spacing: Vec<f64>,
}

/// Reads one N-1 dimensional slice file.
#[cfg_attr(test, mockall::automock)]
pub trait SliceReader: Send + Sync {
    fn read_info(&self, path: &Path) -> PipelineResult<SliceInfo>;

    /// Read the whole slice, laid out over a zero-origin region.
    fn read(&self, path: &Path) -> PipelineResult<Image>;
}

type SliceReaderFactory = Box<dyn Fn() -> Box<dyn SliceReader> + Send + Sync>;

/// Format tag to reader constructor.
pub struct SliceFormatRegistry {
    formats: BTreeMap<String, SliceReaderFactory>,
}

impl SliceFormatRegistry {
    /// Registry without any formats.
    pub fn empty() -> Self {
        Self {
            formats: BTreeMap::new(),
        }
    }

    /// Registry with the built-in formats.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("json", || Box::new(JsonSliceReader));
        registry
    }

    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SliceReader> + Send + Sync + 'static,
    {
        let tag = tag.into();
        tracing::debug!("Registered slice format '{}'", tag);
        self.formats.insert(tag, Box::new(factory));
    }

    pub fn create(&self, tag: &str) -> PipelineResult<Box<dyn SliceReader>> {
        self.formats
            .get(tag)
            .map(|factory| factory())
            .ok_or_else(|| PipelineError::UnsupportedFormat(tag.to_string()))
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }
}

impl Default for SliceFormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk layout of the JSON slice format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSlice {
    pub size: Vec<usize>,
    #[serde(default)]
    pub spacing: Vec<f64>,
    pub pixels: Vec<f64>,
}

impl JsonSlice {
    pub fn from_image(image: &Image) -> Option<Self> {
        let dim = image.region.dim();
        Some(Self {
            size: image.region.size().to_vec(),
            spacing: image.spacing[..dim].to_vec(),
            pixels: image.pixels()?.to_vec(),
        })
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        let text = serde_json::to_string(self).map_err(|e| PipelineError::Decode {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, text)?;
        Ok(())
    }

    fn load(path: &Path) -> PipelineResult<Self> {
        let text = fs::read_to_string(path)?;
        let slice: JsonSlice = serde_json::from_str(&text).map_err(|e| PipelineError::Decode {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if slice.size.len() >= MAX_DIMENSIONS {
            return Err(PipelineError::Decode {
                file: path.to_path_buf(),
                message: format!("slices may have at most {} axes", MAX_DIMENSIONS - 1),
            });
        }
        Ok(slice)
    }
}

/// Reader for [`JsonSlice`] files.
pub struct JsonSliceReader;

impl SliceReader for JsonSliceReader {
    fn read_info(&self, path: &Path) -> PipelineResult<SliceInfo> {
        let slice = JsonSlice::load(path)?;
        let mut spacing = slice.spacing;
        spacing.resize(slice.size.len(), 1.0);
        Ok(SliceInfo {
            size: slice.size,
            spacing,
        })
    }

    fn read(&self, path: &Path) -> PipelineResult<Image> {
        let slice = JsonSlice::load(path)?;
        let region = Region::from_size(&slice.size);
        let found = slice.pixels.len();
        let image = Image::real(region, slice.pixels).ok_or_else(|| PipelineError::Decode {
            file: path.to_path_buf(),
            message: format!(
                "size {:?} needs {} pixels, found {}",
                slice.size,
                region.num_elements(),
                found
            ),
        })?;
        Ok(image.with_spacing(&slice.spacing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_slice_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.json");
        let image = Image::from_fn(Region::from_size(&[3, 2]), |i| (i[0] + 3 * i[1]) as f64)
            .with_spacing(&[0.5, 2.0]);
        JsonSlice::from_image(&image).unwrap().save(&path).unwrap();

        let reader = SliceFormatRegistry::new().create("json").unwrap();
        let info = reader.read_info(&path).unwrap();
        assert_eq!(info.size, vec![3, 2]);
        assert_eq!(info.spacing, vec![0.5, 2.0]);
        assert_eq!(reader.read(&path).unwrap(), image);
    }

    #[test]
    fn test_pixel_count_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"size":[2,2],"pixels":[1.0,2.0,3.0]}"#).unwrap();
        let err = JsonSliceReader.read(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
    }

    #[test]
    fn test_unknown_format() {
        let registry = SliceFormatRegistry::new();
        assert!(matches!(
            registry.create("tiff"),
            Err(PipelineError::UnsupportedFormat(tag)) if tag == "tiff"
        ));
        assert_eq!(registry.formats().collect::<Vec<_>>(), vec!["json"]);
    }
}
