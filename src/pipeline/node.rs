//! Node abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`NodePlugin` trait**: the four-phase capability every node implements,
//!   and the extension point for user-defined nodes.
//! - **`BuiltinNode` enum**: all built-in nodes, dispatched by match so the
//!   hot path does not go through a vtable.
//!
//! `AnyNode` wraps either variant so the pipeline can handle both uniformly.

use crate::image::ImageInfo;
use crate::pipeline::context::{
    default_input_requested_regions, default_output_information, InformationContext,
    RegionContext, RegionRequest,
};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::nodes::{
    BinaryArithmeticNode, ComplexMultiplyNode, ForwardFftNode, ImageSourceNode, InverseFftNode,
    PadNode, RichardsonLucyNode, SeriesReaderNode, UnaryFunctorNode,
};
use crate::pipeline::port::PortDescriptor;
use crate::region::Region;

/// Parameter values that can be sent to nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, and integers widened to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// How the engine may schedule `generate_data` for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threading {
    /// Disjoint pieces of the output region, possibly in parallel.
    Split,
    /// One call covering every output's whole requested region.
    Whole,
}

/// The four-phase node contract.
///
/// `generate_data` takes `&self` and must be safe to run concurrently on
/// disjoint pieces; nodes mutate state only through `on_config_change`.
pub trait NodePlugin: Send + Sync {
    /// Human-readable name of this node.
    fn name(&self) -> &str;

    /// Port descriptors for this node.
    fn ports(&self) -> &[PortDescriptor];

    fn threading(&self) -> Threading {
        Threading::Split
    }

    /// Largest possible region and metadata of each output.
    fn generate_output_information(&self, ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        default_output_information(self.ports(), ctx)
    }

    /// Grow the outputs' requested regions beyond what consumers asked for.
    fn enlarge_output_requested_region(&self, _requested: &mut [Region], _infos: &[ImageInfo]) {}

    /// Region needed from each input to produce the requested outputs.
    fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        default_input_requested_regions(req)
    }

    /// Fill the outputs for `ctx.region`.
    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()>;

    /// Apply a parameter change. Returns whether the key was recognised,
    /// in which case the pipeline marks the node modified.
    fn on_config_change(&mut self, _key: &str, _value: &ConfigValue) -> bool {
        false
    }
}

/// Enum dispatch for built-in nodes.
pub enum BuiltinNode {
    ImageSource(ImageSourceNode),
    UnaryFunctor(UnaryFunctorNode),
    BinaryArithmetic(BinaryArithmeticNode),
    ComplexMultiply(ComplexMultiplyNode),
    ForwardFft(ForwardFftNode),
    InverseFft(InverseFftNode),
    Pad(PadNode),
    RichardsonLucy(RichardsonLucyNode),
    SeriesReader(SeriesReaderNode),
}

macro_rules! dispatch {
    ($self:expr, $n:ident => $body:expr) => {
        match $self {
            BuiltinNode::ImageSource($n) => $body,
            BuiltinNode::UnaryFunctor($n) => $body,
            BuiltinNode::BinaryArithmetic($n) => $body,
            BuiltinNode::ComplexMultiply($n) => $body,
            BuiltinNode::ForwardFft($n) => $body,
            BuiltinNode::InverseFft($n) => $body,
            BuiltinNode::Pad($n) => $body,
            BuiltinNode::RichardsonLucy($n) => $body,
            BuiltinNode::SeriesReader($n) => $body,
        }
    };
}

impl BuiltinNode {
    pub fn name(&self) -> &str {
        dispatch!(self, n => n.name())
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        dispatch!(self, n => n.ports())
    }

    pub fn threading(&self) -> Threading {
        dispatch!(self, n => n.threading())
    }

    pub fn generate_output_information(&self, ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        dispatch!(self, n => n.generate_output_information(ctx))
    }

    pub fn enlarge_output_requested_region(&self, requested: &mut [Region], infos: &[ImageInfo]) {
        dispatch!(self, n => n.enlarge_output_requested_region(requested, infos))
    }

    pub fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        dispatch!(self, n => n.generate_input_requested_region(req))
    }

    pub fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        dispatch!(self, n => n.generate_data(ctx))
    }

    pub fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        dispatch!(self, n => n.on_config_change(key, value))
    }
}

/// Wrapper that holds either a built-in node (enum dispatch) or a plugin (trait object).
pub enum AnyNode {
    Builtin(BuiltinNode),
    Plugin(Box<dyn NodePlugin>),
}

impl AnyNode {
    pub fn name(&self) -> &str {
        match self {
            AnyNode::Builtin(n) => n.name(),
            AnyNode::Plugin(n) => n.name(),
        }
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        match self {
            AnyNode::Builtin(n) => n.ports(),
            AnyNode::Plugin(n) => n.ports(),
        }
    }

    pub fn threading(&self) -> Threading {
        match self {
            AnyNode::Builtin(n) => n.threading(),
            AnyNode::Plugin(n) => n.threading(),
        }
    }

    pub fn generate_output_information(&self, ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        match self {
            AnyNode::Builtin(n) => n.generate_output_information(ctx),
            AnyNode::Plugin(n) => n.generate_output_information(ctx),
        }
    }

    pub fn enlarge_output_requested_region(&self, requested: &mut [Region], infos: &[ImageInfo]) {
        match self {
            AnyNode::Builtin(n) => n.enlarge_output_requested_region(requested, infos),
            AnyNode::Plugin(n) => n.enlarge_output_requested_region(requested, infos),
        }
    }

    pub fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        match self {
            AnyNode::Builtin(n) => n.generate_input_requested_region(req),
            AnyNode::Plugin(n) => n.generate_input_requested_region(req),
        }
    }

    pub fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        match self {
            AnyNode::Builtin(n) => n.generate_data(ctx),
            AnyNode::Plugin(n) => n.generate_data(ctx),
        }
    }

    pub fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match self {
            AnyNode::Builtin(n) => n.on_config_change(key, value),
            AnyNode::Plugin(n) => n.on_config_change(key, value),
        }
    }
}

impl From<BuiltinNode> for AnyNode {
    fn from(node: BuiltinNode) -> Self {
        AnyNode::Builtin(node)
    }
}

impl From<Box<dyn NodePlugin>> for AnyNode {
    fn from(node: Box<dyn NodePlugin>) -> Self {
        AnyNode::Plugin(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_accessors() {
        assert_eq!(ConfigValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ConfigValue::Int(42).as_int(), Some(42));
        assert_eq!(ConfigValue::Int(2).as_float(), Some(2.0));
        assert_eq!(ConfigValue::Float(0.25).as_float(), Some(0.25));
        assert_eq!(ConfigValue::String("zero".into()).as_str(), Some("zero"));
        assert_eq!(ConfigValue::Bool(true).as_int(), None);
    }
}
