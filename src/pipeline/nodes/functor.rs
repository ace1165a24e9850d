//! UnaryFunctorNode: per-pixel function of one real input.

use crate::image::PixelKind;
use crate::pipeline::context::RegionContext;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ConfigValue, NodePlugin};
use crate::pipeline::nodes::offsets_within;
use crate::pipeline::port::PortDescriptor;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PixelKind::Real),
    PortDescriptor::output("output", PixelKind::Real),
];

/// Pure per-pixel function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryFunctor {
    Abs,
    Scale(f64),
}

impl UnaryFunctor {
    #[inline]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            UnaryFunctor::Abs => value.abs(),
            UnaryFunctor::Scale(factor) => value * factor,
        }
    }
}

pub struct UnaryFunctorNode {
    functor: UnaryFunctor,
}

impl UnaryFunctorNode {
    pub fn new(functor: UnaryFunctor) -> Self {
        Self { functor }
    }

    pub fn functor(&self) -> UnaryFunctor {
        self.functor
    }
}

impl NodePlugin for UnaryFunctorNode {
    fn name(&self) -> &str {
        match self.functor {
            UnaryFunctor::Abs => "Abs",
            UnaryFunctor::Scale(_) => "Scale",
        }
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let input = ctx.input(0, "input")?;
        let pixels = input
            .real()
            .ok_or_else(|| ctx.fail("input is not a real buffer"))?;
        let (region, out) = ctx.real_output(0)?;
        for (dst, offset) in out.iter_mut().zip(offsets_within(input.region, region)) {
            *dst = self.functor.apply(pixels[offset]);
        }
        Ok(())
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match key {
            "functor" => match value.as_str() {
                Some("abs") => {
                    self.functor = UnaryFunctor::Abs;
                    true
                }
                Some("scale") => {
                    self.functor = UnaryFunctor::Scale(1.0);
                    true
                }
                _ => false,
            },
            "factor" => match (self.functor, value.as_float()) {
                (UnaryFunctor::Scale(_), Some(factor)) => {
                    self.functor = UnaryFunctor::Scale(factor);
                    true
                }
                _ => false,
            },
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
    use crate::pipeline::threader::Threader;
    use crate::region::Region;

    #[test]
    fn test_abs_over_split_pieces() {
        let region = Region::from_size(&[3, 8]);
        let image = Image::from_fn(region, |i| (i[0] - i[1]) as f64);
        let mut pipeline = Pipeline::new(Threader::new(Some(4), 1));
        let abs = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        pipeline
            .set_input(abs, "input", DataObject::from_image(image))
            .unwrap();

        let stats = pipeline.update(abs).unwrap();
        assert_eq!(stats.generate_data_calls, 4);
        let out = pipeline.output(abs, "output").unwrap().snapshot().unwrap();
        for index in region.indices() {
            assert_eq!(out.value(&index), Some(((index[0] - index[1]) as f64).abs()));
        }
    }

    #[test]
    fn test_factor_only_applies_to_scale() {
        let mut node = UnaryFunctorNode::new(UnaryFunctor::Abs);
        assert!(!node.on_config_change("factor", &ConfigValue::Float(2.0)));
        assert!(node.on_config_change("functor", &ConfigValue::String("scale".into())));
        assert!(node.on_config_change("factor", &ConfigValue::Int(3)));
        assert_eq!(node.functor(), UnaryFunctor::Scale(3.0));
        assert_eq!(node.functor().apply(-2.0), -6.0);
    }
}
