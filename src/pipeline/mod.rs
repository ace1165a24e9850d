//! Demand-driven, region-negotiated image pipeline.
//!
//! Nodes live in a [`Pipeline`] arena and exchange images through shared
//! [`DataObject`]s. An update negotiates metadata and regions upstream before
//! any pixel is computed, then generates only what the terminal actually
//! asked for, splitting each node's output across a worker pool.
//!
//! # Architecture
//!
//! ```text
//! [ImageSource] ──► [Pad] ──► [ForwardFft] ──► [ComplexMultiply] ──► ...
//!        information pass ──►
//!                          ◄── region pass (union + fixed point)
//!        data pass (demand-driven, split per worker) ──►
//! ```
//!
//! # Design
//!
//! - **Enum dispatch** for built-in nodes (`BuiltinNode`), trait objects for
//!   user nodes (`NodePlugin`), both behind `AnyNode`.
//! - **Arena + handles**: nodes are addressed by `NodeId`; data objects are
//!   reference counted and own no back-pointers to their consumers.
//! - **Disconnect** turns an output into an immutable leaf, which is how
//!   iterative solvers keep their graph at a constant size.

pub mod context;
pub mod data_object;
pub mod error;
pub mod executor;
pub mod id;
pub mod node;
pub mod nodes;
pub mod port;
pub mod progress;
pub mod stamp;
pub mod threader;

pub use context::{InformationContext, InputView, OutputChunk, RegionContext, RegionRequest};
pub use data_object::{DataHandle, DataObject};
pub use error::{PipelineError, PipelineResult};
pub use executor::{Pipeline, UpdateStats};
pub use id::{NodeId, PipelineId, SourceLink};
pub use node::{AnyNode, BuiltinNode, ConfigValue, NodePlugin, Threading};
pub use port::{PortDescriptor, PortDirection};
pub use progress::{ProgressAccumulator, ProgressFn, ProgressObserver, ProgressReporter, ScopeHandle};
pub use stamp::Stamp;
pub use threader::Threader;
