//! Slice series on disk through the pipeline.

mod common;

use common::builders::write_slices;
use regionflow::collaborators::{Histogram, IsoDataThresholdCalculator, SliceFormatRegistry};
use regionflow::pipeline::nodes::{SeriesReaderNode, UnaryFunctor, UnaryFunctorNode};
use regionflow::pipeline::{ConfigValue, Pipeline, PipelineError, Threader};
use regionflow::region::Region;

fn reader_pipeline(files: Vec<std::path::PathBuf>) -> (Pipeline, regionflow::pipeline::NodeId) {
    let mut pipeline = Pipeline::new(Threader::new(Some(3), 1));
    let reader = pipeline.add_node(SeriesReaderNode::new(files, &SliceFormatRegistry::new(), "json").unwrap());
    (pipeline, reader)
}

#[test]
fn test_slices_are_stacked_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_slices(dir.path(), &[&[3, 2], &[3, 2], &[3, 2], &[3, 2]]);
    let (mut p, reader) = reader_pipeline(files);
    p.update(reader).unwrap();

    let out = p.output(reader, "output").unwrap();
    assert_eq!(out.largest_possible_region(), Some(Region::from_size(&[3, 2, 4])));
    assert_eq!(out.value_at(&[0, 0, 0]), Some(0.0));
    assert_eq!(out.value_at(&[2, 1, 0]), Some(5.0));
    assert_eq!(out.value_at(&[1, 1, 3]), Some(304.0));
}

#[test]
fn test_reverse_order_flips_the_slice_axis() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_slices(dir.path(), &[&[3, 2], &[3, 2], &[3, 2]]);
    let (mut p, reader) = reader_pipeline(files);
    p.update(reader).unwrap();
    assert!(p.set_parameter(reader, "reverse_order", ConfigValue::Bool(true)).unwrap());
    p.update(reader).unwrap();

    let out = p.output(reader, "output").unwrap();
    assert_eq!(out.value_at(&[0, 0, 0]), Some(200.0));
    assert_eq!(out.value_at(&[1, 0, 2]), Some(1.0));
    assert_eq!(out.value_at(&[2, 1, 1]), Some(105.0));
}

#[test]
fn test_mismatched_slice_size_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_slices(dir.path(), &[&[3, 2], &[3, 2], &[4, 2]]);
    let odd = files[2].clone();
    let (mut p, reader) = reader_pipeline(files);

    match p.update(reader).unwrap_err() {
        PipelineError::SizeMismatch { file, expected, found } => {
            assert_eq!(file, odd);
            assert_eq!(expected, vec![3, 2]);
            assert_eq!(found, vec![4, 2]);
        }
        other => panic!("expected SizeMismatch, got {other}"),
    }
}

#[test]
fn test_unrequested_slices_are_never_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_slices(dir.path(), &[&[3, 2], &[3, 2], &[3, 2], &[3, 2]]);
    // Header is valid but the pixels are not, so reading this slice fails.
    std::fs::write(&files[0], r#"{"size":[3,2],"pixels":[]}"#).unwrap();
    let (mut p, reader) = reader_pipeline(files);

    let wanted = Region::new(&[0, 0, 1], &[3, 2, 2]);
    p.set_requested_region(reader, "output", wanted).unwrap();
    p.update(reader).unwrap();
    let out = p.output(reader, "output").unwrap();
    assert_eq!(out.buffered_region(), wanted);
    assert_eq!(out.value_at(&[2, 0, 2]), Some(202.0));

    let err = p.update_largest_possible_region(reader).unwrap_err();
    assert!(matches!(err, PipelineError::Decode { .. }), "{err}");
}

#[test]
fn test_unknown_format_is_rejected() {
    let registry = SliceFormatRegistry::new();
    let result = SeriesReaderNode::new(Vec::new(), &registry, "tiff");
    assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
}

#[test]
fn test_series_feeds_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_slices(dir.path(), &[&[4, 4], &[4, 4]]);
    let (mut p, reader) = reader_pipeline(files);
    let scale = p.add_node(UnaryFunctorNode::new(UnaryFunctor::Scale(0.5)));
    p.connect(reader, "output", scale, "input").unwrap();
    p.update(scale).unwrap();

    let image = p.output(scale, "output").unwrap().snapshot().unwrap();
    let pixels = image.pixels().unwrap();
    let histogram = Histogram::from_samples(pixels, 64).unwrap();
    let threshold = IsoDataThresholdCalculator::new().calculate(&histogram).unwrap();
    // Slice 0 holds 0..16, slice 1 holds 100..116, halved.
    assert!(threshold.value > 7.5 && threshold.value < 50.0, "{}", threshold.value);
    let foreground = pixels.iter().filter(|&&v| v >= threshold.value).count();
    assert_eq!(foreground, 16);
}
