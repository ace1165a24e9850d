//! Components at the edge of the engine: slice file readers feeding the
//! pipeline and calculators consuming its results.

pub mod series;
pub mod threshold;

pub use series::{JsonSlice, JsonSliceReader, SliceFormatRegistry, SliceInfo, SliceReader};
pub use threshold::{Bin, Histogram, IsoDataThresholdCalculator, Threshold};
