//! Test data builders for creating images and slice fixtures

use regionflow::collaborators::JsonSlice;
use regionflow::image::Image;
use regionflow::region::Region;
use std::path::{Path, PathBuf};

/// Builder for creating test images
pub struct ImageBuilder {
    origin: Vec<i64>,
    size: Vec<usize>,
    spacing: Vec<f64>,
}

impl ImageBuilder {
    pub fn new(size: &[usize]) -> Self {
        Self {
            origin: vec![0; size.len()],
            size: size.to_vec(),
            spacing: vec![1.0; size.len()],
        }
    }

    pub fn origin(mut self, origin: &[i64]) -> Self {
        self.origin = origin.to_vec();
        self
    }

    pub fn spacing(mut self, spacing: &[f64]) -> Self {
        self.spacing = spacing.to_vec();
        self
    }

    pub fn region(&self) -> Region {
        Region::new(&self.origin, &self.size)
    }

    /// Pixel value `sum(index[axis] * 10^axis)`, unique per index for small images.
    pub fn ramp(self) -> Image {
        self.fill_with(|i| {
            i.iter()
                .enumerate()
                .map(|(axis, &v)| v as f64 * 10f64.powi(axis as i32))
                .sum()
        })
    }

    pub fn constant(self, value: f64) -> Image {
        self.fill_with(|_| value)
    }

    pub fn fill_with(self, f: impl Fn(&[i64]) -> f64) -> Image {
        Image::from_fn(self.region(), f).with_spacing(&self.spacing)
    }
}

/// Write one JSON slice per entry of `sizes`. Slice `k` holds
/// `100 * k + offset` at each buffer offset.
pub fn write_slices(dir: &Path, sizes: &[&[usize]]) -> Vec<PathBuf> {
    sizes
        .iter()
        .enumerate()
        .map(|(k, size)| {
            let region = Region::from_size(size);
            let pixels = (0..region.num_elements())
                .map(|offset| (100 * k + offset) as f64)
                .collect();
            let image = Image::real(region, pixels).unwrap();
            let path = dir.join(format!("slice_{k:02}.json"));
            JsonSlice::from_image(&image).unwrap().save(&path).unwrap();
            path
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_builder() {
        let image = ImageBuilder::new(&[3, 2]).origin(&[-1, 4]).ramp();
        assert_eq!(image.region, Region::new(&[-1, 4], &[3, 2]));
        assert_eq!(image.value(&[1, 5]), Some(51.0));
    }
}
