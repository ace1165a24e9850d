//! ComplexMultiplyNode: pixel-wise product of two frequency-domain images.

use crate::image::{ImageInfo, PixelKind};
use crate::pipeline::context::{InformationContext, RegionContext};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ConfigValue, NodePlugin};
use crate::pipeline::nodes::{matching_inputs_information, offsets_within};
use crate::pipeline::port::PortDescriptor;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input1", PixelKind::Complex),
    PortDescriptor::input("input2", PixelKind::Complex),
    PortDescriptor::output("output", PixelKind::Complex),
];

/// `input1 * input2`, or `input1 * conj(input2)` when `conjugate_second` is set.
pub struct ComplexMultiplyNode {
    conjugate_second: bool,
}

impl ComplexMultiplyNode {
    pub fn new() -> Self {
        Self {
            conjugate_second: false,
        }
    }

    pub fn conjugate() -> Self {
        Self {
            conjugate_second: true,
        }
    }

    pub fn conjugate_second(&self) -> bool {
        self.conjugate_second
    }
}

impl Default for ComplexMultiplyNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for ComplexMultiplyNode {
    fn name(&self) -> &str {
        if self.conjugate_second {
            "ComplexConjugateMultiply"
        } else {
            "ComplexMultiply"
        }
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn generate_output_information(&self, ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        matching_inputs_information(PORTS, ctx)
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let lhs = ctx.input(0, "input1")?;
        let rhs = ctx.input(1, "input2")?;
        let (Some(a), Some(b)) = (lhs.complex(), rhs.complex()) else {
            return Err(ctx.fail("inputs must be complex buffers"));
        };
        let (region, out) = ctx.complex_output(0)?;
        let pairs = offsets_within(lhs.region, region).zip(offsets_within(rhs.region, region));
        for (dst, (i, j)) in out.iter_mut().zip(pairs) {
            let second = if self.conjugate_second { b[j].conj() } else { b[j] };
            *dst = a[i] * second;
        }
        Ok(())
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        match (key, value.as_bool()) {
            ("conjugate", Some(conjugate)) => {
                self.conjugate_second = conjugate;
                true
            }
            _ => false,
        }
    }
}
