//! # regionflow: demand-driven image pipelines
//!
//! A pipeline engine for N-dimensional images (up to four axes) that only
//! computes what is asked for. Consumers request regions, producers negotiate
//! which parts of their inputs they need, and each node's output is generated
//! in parallel pieces across a worker pool.
//!
//! ## Architecture
//!
//! - **Region algebra**: [`region::Region`], a `Copy` integer box
//! - **Pipeline**: node arena, data objects and the update protocol
//!   ([`pipeline::Pipeline`])
//! - **Progress**: weighted scope tree with monotonic totals across
//!   iterations ([`pipeline::ProgressAccumulator`])
//! - **Solvers**: iterative algorithms on a fixed sub-graph
//!   ([`solver::RichardsonLucySolver`])
//! - **Collaborators**: slice readers and threshold calculators at the
//!   boundary
//!
//! ## Example
//!
//! ```ignore
//! use regionflow::image::Image;
//! use regionflow::pipeline::{DataObject, Pipeline};
//! use regionflow::pipeline::nodes::{UnaryFunctor, UnaryFunctorNode};
//! use regionflow::region::Region;
//!
//! let image = Image::from_fn(Region::from_size(&[64, 64]), |i| (i[0] - i[1]) as f64);
//! let mut pipeline = Pipeline::default();
//! let abs = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
//! pipeline.set_input(abs, "input", DataObject::from_image(image))?;
//! pipeline.set_requested_region(abs, "output", Region::new(&[8, 8], &[16, 16]))?;
//! pipeline.update(abs)?;
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod region;
pub mod solver;

// Re-export commonly used types
pub use config::{EngineConfig, RegionflowConfig};
pub use error::{RegionflowError, Result};
pub use image::{Image, ImageInfo, PixelKind};
pub use pipeline::{Pipeline, PipelineError, PipelineResult};
pub use region::{Region, RegionError};
pub use solver::{IterativeSolver, RichardsonLucySettings, RichardsonLucySolver};
