//! SeriesReaderNode: stacks an ordered list of slice files along a new
//! slowest-varying axis.
//!
//! The output region is split along the slice axis, so slices are read in
//! parallel and only files intersecting the requested region are opened.

use crate::collaborators::series::{SliceFormatRegistry, SliceInfo, SliceReader};
use crate::image::{ImageInfo, PixelKind};
use crate::pipeline::context::{InformationContext, RegionContext};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{ConfigValue, NodePlugin};
use crate::pipeline::nodes::copy_region;
use crate::pipeline::port::PortDescriptor;
use crate::region::{Region, MAX_DIMENSIONS};
use std::path::{Path, PathBuf};

static PORTS: &[PortDescriptor] = &[PortDescriptor::output("output", PixelKind::Real)];

pub struct SeriesReaderNode {
    files: Vec<PathBuf>,
    reader: Box<dyn SliceReader>,
    reverse_order: bool,
}

impl SeriesReaderNode {
    /// Reader for `files` in the format registered under `format`.
    pub fn new(files: Vec<PathBuf>, registry: &SliceFormatRegistry, format: &str) -> PipelineResult<Self> {
        Ok(Self::with_reader(files, registry.create(format)?))
    }

    pub fn with_reader(files: Vec<PathBuf>, reader: Box<dyn SliceReader>) -> Self {
        Self {
            files,
            reader,
            reverse_order: false,
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn reverse_order(&self) -> bool {
        self.reverse_order
    }

    pub fn set_reverse_order(&mut self, reverse: bool) {
        self.reverse_order = reverse;
    }

    /// File holding slice `slice` of the output.
    fn file_for(&self, slice: usize) -> &Path {
        let index = if self.reverse_order {
            self.files.len() - 1 - slice
        } else {
            slice
        };
        &self.files[index]
    }

    fn check_size(file: &Path, expected: &[usize], found: &[usize]) -> PipelineResult<()> {
        if expected == found {
            return Ok(());
        }
        Err(PipelineError::SizeMismatch {
            file: file.to_path_buf(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        })
    }
}

impl NodePlugin for SeriesReaderNode {
    fn name(&self) -> &str {
        "SeriesReader"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn generate_output_information(&self, _ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        let Some(first) = self.files.first() else {
            return Err(PipelineError::EmptyInput("series reader has no files".into()));
        };
        let SliceInfo { size, spacing } = self.reader.read_info(first)?;
        if size.len() >= MAX_DIMENSIONS {
            return Err(PipelineError::Decode {
                file: first.clone(),
                message: format!("slices may have at most {} axes", MAX_DIMENSIONS - 1),
            });
        }
        for file in &self.files[1..] {
            let info = self.reader.read_info(file)?;
            Self::check_size(file, &size, &info.size)?;
        }

        let largest = Region::from_size(&size).try_appended(0, self.files.len())?;
        let mut full_spacing = spacing;
        full_spacing.resize(size.len(), 1.0);
        full_spacing.push(1.0);
        tracing::debug!(
            "Series of {} slices, slice size {:?}, output {}",
            self.files.len(),
            size,
            largest
        );
        Ok(vec![ImageInfo::new(largest, PixelKind::Real).with_spacing(&full_spacing)])
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let slice_size: Vec<usize> = ctx.output_infos[0].largest.truncated().size().to_vec();
        let (region, out) = ctx.real_output(0)?;
        let within_slice = region.truncated();
        let per_slice = within_slice.num_elements();
        if per_slice == 0 {
            return Ok(());
        }
        let axis = region.dim() - 1;
        let first_slice = region.origin()[axis];
        for (offset, window) in out.chunks_mut(per_slice).enumerate() {
            let file = self.file_for(first_slice as usize + offset);
            let slice = self.reader.read(file)?;
            Self::check_size(file, &slice_size, slice.region.size())?;
            let pixels = slice.pixels().ok_or_else(|| PipelineError::Decode {
                file: file.to_path_buf(),
                message: "slice is not real-valued".into(),
            })?;
            copy_region(slice.region, pixels, within_slice, window);
        }
        Ok(())
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match (key, value.as_bool()) {
            ("reverse_order", Some(reverse)) => {
                self.reverse_order = reverse;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::series::MockSliceReader;
    use crate::image::Image;
    use crate::pipeline::executor::Pipeline;
    use crate::pipeline::threader::Threader;

    fn mock_reader(reads: usize) -> MockSliceReader {
        let mut reader = MockSliceReader::new();
        reader.expect_read_info().returning(|_| {
            Ok(SliceInfo {
                size: vec![2],
                spacing: vec![0.5],
            })
        });
        reader.expect_read().times(reads).returning(|path| {
            let tag: f64 = path
                .to_string_lossy()
                .trim_start_matches("slice")
                .parse()
                .unwrap_or(-1.0);
            Ok(Image::from_fn(Region::from_size(&[2]), move |i| tag * 10.0 + i[0] as f64))
        });
        reader
    }

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("slice{i}"))).collect()
    }

    #[test]
    fn test_only_requested_slices_are_read() {
        let mut pipeline = Pipeline::new(Threader::new(Some(2), 1));
        let reader = pipeline.add_node(SeriesReaderNode::with_reader(files(5), Box::new(mock_reader(2))));
        pipeline
            .set_requested_region(reader, "output", Region::new(&[0, 1], &[2, 2]))
            .unwrap();
        pipeline.update(reader).unwrap();

        let out = pipeline.output(reader, "output").unwrap();
        let info = out.info().unwrap();
        assert_eq!(info.largest, Region::from_size(&[2, 5]));
        assert_eq!(&info.spacing[..2], &[0.5, 1.0]);
        assert_eq!(out.value_at(&[1, 2]), Some(21.0));
        assert_eq!(out.value_at(&[0, 1]), Some(10.0));
    }

    #[test]
    fn test_reverse_order_parameter() {
        let mut pipeline = Pipeline::default();
        let reader = pipeline.add_node(SeriesReaderNode::with_reader(files(3), Box::new(mock_reader(6))));
        pipeline.update(reader).unwrap();
        let out = pipeline.output(reader, "output").unwrap();
        assert_eq!(out.value_at(&[1, 0]), Some(1.0));

        assert!(pipeline
            .set_parameter(reader, "reverse_order", ConfigValue::Bool(true))
            .unwrap());
        pipeline.update(reader).unwrap();
        let out = pipeline.output(reader, "output").unwrap();
        assert_eq!(out.value_at(&[1, 0]), Some(21.0));
        assert_eq!(out.value_at(&[0, 2]), Some(0.0));
    }

    #[test]
    fn test_no_files_is_empty_input() {
        let mut pipeline = Pipeline::default();
        let reader = pipeline.add_node(SeriesReaderNode::with_reader(Vec::new(), Box::new(MockSliceReader::new())));
        assert!(matches!(pipeline.update(reader), Err(PipelineError::EmptyInput(_))));
    }
}
