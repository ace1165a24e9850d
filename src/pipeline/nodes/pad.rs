//! PadNode: grows an image by a fixed margin on every axis.

use crate::image::{ImageInfo, PixelKind};
use crate::pipeline::context::{InformationContext, RegionContext, RegionRequest};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ConfigValue, NodePlugin};
use crate::pipeline::port::PortDescriptor;
use crate::region::{Region, MAX_DIMENSIONS};
use serde::{Deserialize, Serialize};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PixelKind::Real),
    PortDescriptor::output("output", PixelKind::Real),
];

/// How samples outside the input are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingMethod {
    /// Zero outside the input.
    Zero,
    /// Repeat the nearest edge sample (zero derivative at the border).
    #[default]
    ZeroFluxNeumann,
}

impl PaddingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaddingMethod::Zero => "zero",
            PaddingMethod::ZeroFluxNeumann => "zero_flux_neumann",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "zero" => Some(PaddingMethod::Zero),
            "zero_flux_neumann" => Some(PaddingMethod::ZeroFluxNeumann),
            _ => None,
        }
    }
}

pub struct PadNode {
    lower: [usize; MAX_DIMENSIONS],
    upper: [usize; MAX_DIMENSIONS],
    method: PaddingMethod,
}

impl PadNode {
    /// Pad by `lower` below the origin and `upper` past the end of each axis.
    pub fn new(lower: &[usize], upper: &[usize], method: PaddingMethod) -> Self {
        let mut node = Self {
            lower: [0; MAX_DIMENSIONS],
            upper: [0; MAX_DIMENSIONS],
            method,
        };
        for (dst, src) in node.lower.iter_mut().zip(lower) {
            *dst = *src;
        }
        for (dst, src) in node.upper.iter_mut().zip(upper) {
            *dst = *src;
        }
        node
    }

    pub fn method(&self) -> PaddingMethod {
        self.method
    }

    /// Part of `input` the samples of `wanted` are read from.
    fn source_region(&self, wanted: &Region, input: &Region) -> Region {
        match self.method {
            PaddingMethod::Zero => wanted.intersect(input),
            PaddingMethod::ZeroFluxNeumann => {
                if wanted.is_empty() || input.is_empty() {
                    return Region::empty(input.dim());
                }
                let dim = input.dim();
                let mut origin = [0i64; MAX_DIMENSIONS];
                let mut size = [0usize; MAX_DIMENSIONS];
                for axis in 0..dim {
                    let (lo, hi) = (input.origin()[axis], input.upper(axis) - 1);
                    let start = wanted.origin()[axis].clamp(lo, hi);
                    let end = (wanted.upper(axis) - 1).clamp(lo, hi);
                    origin[axis] = start;
                    size[axis] = (end - start + 1) as usize;
                }
                Region::new(&origin[..dim], &size[..dim])
            }
        }
    }
}

impl NodePlugin for PadNode {
    fn name(&self) -> &str {
        "Pad"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn generate_output_information(&self, ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        let input = ctx.input(0, "input")?;
        Ok(vec![input.with_largest(input.largest.pad(&self.lower, &self.upper))])
    }

    fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        let wanted = req.outputs.first().copied();
        vec![req
            .inputs
            .first()
            .copied()
            .flatten()
            .map(|info| match wanted {
                Some(w) => self.source_region(&w, &info.largest),
                None => info.largest,
            })]
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let input = ctx.input(0, "input")?;
        let largest = input.info.largest;
        let dim = largest.dim();
        let method = self.method;
        let (region, out) = ctx.real_output(0)?;
        for (dst, mut index) in out.iter_mut().zip(region.indices()) {
            if method == PaddingMethod::ZeroFluxNeumann && !largest.is_empty() {
                for (axis, value) in index.iter_mut().enumerate().take(dim) {
                    *value = (*value).clamp(largest.origin()[axis], largest.upper(axis) - 1);
                }
            }
            *dst = input.value(&index[..dim]);
        }
        Ok(())
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match (key, value.as_str().and_then(PaddingMethod::parse)) {
            ("method", Some(method)) => {
                self.method = method;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use crate::pipeline::data_object::DataObject;
    use crate::pipeline::executor::Pipeline;

    fn padded(method: PaddingMethod) -> (Pipeline, crate::pipeline::id::NodeId) {
        let image = Image::from_fn(Region::from_size(&[3, 2]), |i| (1 + i[0] + 10 * i[1]) as f64);
        let mut pipeline = Pipeline::default();
        let pad = pipeline.add_node(PadNode::new(&[1, 0], &[2, 1], method));
        pipeline.set_input(pad, "input", DataObject::from_image(image)).unwrap();
        (pipeline, pad)
    }

    #[test]
    fn test_zero_flux_neumann_repeats_edges() {
        let (mut pipeline, pad) = padded(PaddingMethod::ZeroFluxNeumann);
        pipeline.update(pad).unwrap();
        let out = pipeline.output(pad, "output").unwrap();
        assert_eq!(out.largest_possible_region(), Some(Region::new(&[-1, 0], &[6, 3])));
        assert_eq!(out.value_at(&[-1, 0]), Some(1.0));
        assert_eq!(out.value_at(&[4, 0]), Some(3.0));
        assert_eq!(out.value_at(&[1, 2]), Some(12.0));
        assert_eq!(out.value_at(&[1, 1]), Some(12.0));
    }

    #[test]
    fn test_zero_padding() {
        let (mut pipeline, pad) = padded(PaddingMethod::Zero);
        pipeline.update(pad).unwrap();
        let out = pipeline.output(pad, "output").unwrap();
        assert_eq!(out.value_at(&[-1, 0]), Some(0.0));
        assert_eq!(out.value_at(&[0, 0]), Some(1.0));
        assert_eq!(out.value_at(&[2, 2]), Some(0.0));
    }

    #[test]
    fn test_border_request_projects_onto_input() {
        let node = PadNode::new(&[2], &[2], PaddingMethod::ZeroFluxNeumann);
        let input = Region::new(&[0], &[4]);
        assert_eq!(
            node.source_region(&Region::new(&[-2], &[2]), &input),
            Region::new(&[0], &[1])
        );
        assert_eq!(
            node.source_region(&Region::new(&[3], &[3]), &input),
            Region::new(&[3], &[1])
        );
        let zero = PadNode::new(&[2], &[2], PaddingMethod::Zero);
        assert!(zero.source_region(&Region::new(&[-2], &[2]), &input).is_empty());
    }

    #[test]
    fn test_method_parameter() {
        let mut node = PadNode::new(&[1], &[1], PaddingMethod::Zero);
        assert!(node.on_config_change("method", &ConfigValue::String("zero_flux_neumann".into())));
        assert_eq!(node.method(), PaddingMethod::ZeroFluxNeumann);
        assert!(!node.on_config_change("method", &ConfigValue::String("mirror".into())));
    }
}
