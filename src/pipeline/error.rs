//! Pipeline-specific error types.

use crate::pipeline::id::NodeId;
use crate::region::{Region, RegionError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur within the pipeline system.
///
/// `InvalidRegion`, `UnsatisfiedInput` and `StaleDisconnectedObject` are
/// contract violations: they abort the running update and are never
/// recovered inside the engine.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid region on {node:?}: requested {requested} is outside largest possible {largest}")]
    InvalidRegion {
        node: Option<NodeId>,
        requested: Region,
        largest: Region,
    },

    #[error("Unsatisfied input '{port}' of node {node:?}: {reason}")]
    UnsatisfiedInput {
        node: NodeId,
        port: &'static str,
        reason: String,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Size mismatch in {file:?}: expected {expected:?}, found {found:?}")]
    SizeMismatch {
        file: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Input '{port}' of node {node:?} spans {found}, expected {expected}")]
    ExtentMismatch {
        node: NodeId,
        port: &'static str,
        expected: Region,
        found: Region,
    },

    #[error("Length mismatch in {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Data object was disconnected from its producer and cannot be updated")]
    StaleDisconnectedObject,

    #[error("Node {node_id:?} error: {message}")]
    Node { node_id: NodeId, message: String },

    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("Node {node:?} has no {direction} port named '{name}'")]
    UnknownPort {
        node: NodeId,
        direction: &'static str,
        name: String,
    },

    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    #[error("Unsupported slice format '{0}'")]
    UnsupportedFormat(String),

    #[error("Slice decode error in {file:?}: {message}")]
    Decode { file: PathBuf, message: String },

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker channel closed")]
    Channel,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
