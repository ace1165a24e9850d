//! Identity types for the pipeline system.
//!
//! `NodeId` is a newtype over `u32` that serves as a direct index into the
//! owning pipeline's node arena. `PipelineId` tells arenas apart so a data
//! object's producer link is never resolved against the wrong pipeline.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index into `Pipeline::nodes`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Process-unique identifier of a `Pipeline` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PipelineId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a data object came from: output `port` of `node` in `pipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLink {
    pub pipeline: PipelineId,
    pub node: NodeId,
    pub port: usize,
}
