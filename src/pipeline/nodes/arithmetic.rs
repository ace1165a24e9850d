//! BinaryArithmeticNode: pixel-wise multiply or divide of two real inputs.

use crate::image::{ImageInfo, PixelKind};
use crate::pipeline::context::{InformationContext, RegionContext};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ConfigValue, NodePlugin};
use crate::pipeline::nodes::{matching_inputs_information, offsets_within};
use crate::pipeline::port::PortDescriptor;
use serde::{Deserialize, Serialize};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input1", PixelKind::Real),
    PortDescriptor::input("input2", PixelKind::Real),
    PortDescriptor::output("output", PixelKind::Real),
];

/// What a division does when the denominator is (near) zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DivisionPolicy {
    /// Output zero wherever `|denominator| < threshold`.
    ZeroOut { threshold: f64 },
    /// Divide by `epsilon` (with the denominator's sign) wherever
    /// `|denominator| < epsilon`.
    Clamp { epsilon: f64 },
    /// Plain IEEE division; zero denominators give infinities or NaN.
    Propagate,
}

impl Default for DivisionPolicy {
    fn default() -> Self {
        DivisionPolicy::ZeroOut { threshold: 1e-5 }
    }
}

impl DivisionPolicy {
    #[inline]
    pub fn divide(self, numerator: f64, denominator: f64) -> f64 {
        match self {
            DivisionPolicy::ZeroOut { threshold } => {
                if denominator.abs() < threshold {
                    0.0
                } else {
                    numerator / denominator
                }
            }
            DivisionPolicy::Clamp { epsilon } => {
                if denominator.abs() < epsilon {
                    numerator / epsilon.copysign(denominator)
                } else {
                    numerator / denominator
                }
            }
            DivisionPolicy::Propagate => numerator / denominator,
        }
    }

    /// Parse a policy name, keeping the current tolerance where one applies.
    fn with_name(self, name: &str) -> Option<Self> {
        let tolerance = self.tolerance().unwrap_or(1e-5);
        match name {
            "zero_out" => Some(DivisionPolicy::ZeroOut { threshold: tolerance }),
            "clamp" => Some(DivisionPolicy::Clamp { epsilon: tolerance }),
            "propagate" => Some(DivisionPolicy::Propagate),
            _ => None,
        }
    }

    /// Apply a `division` (policy name) or `threshold` parameter.
    pub(crate) fn with_parameter(self, key: &str, value: &ConfigValue) -> Option<Self> {
        match key {
            "division" => value.as_str().and_then(|name| self.with_name(name)),
            "threshold" => match (self, value.as_float()) {
                (DivisionPolicy::ZeroOut { .. }, Some(threshold)) => {
                    Some(DivisionPolicy::ZeroOut { threshold })
                }
                (DivisionPolicy::Clamp { .. }, Some(epsilon)) => Some(DivisionPolicy::Clamp { epsilon }),
                _ => None,
            },
            _ => None,
        }
    }

    fn tolerance(self) -> Option<f64> {
        match self {
            DivisionPolicy::ZeroOut { threshold } => Some(threshold),
            DivisionPolicy::Clamp { epsilon } => Some(epsilon),
            DivisionPolicy::Propagate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Multiply,
    Divide(DivisionPolicy),
}

pub struct BinaryArithmeticNode {
    op: BinaryOp,
}

impl BinaryArithmeticNode {
    pub fn new(op: BinaryOp) -> Self {
        Self { op }
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }
}

impl NodePlugin for BinaryArithmeticNode {
    fn name(&self) -> &str {
        match self.op {
            BinaryOp::Multiply => "Multiply",
            BinaryOp::Divide(_) => "Divide",
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
        let (Some(a), Some(b)) = (lhs.real(), rhs.real()) else {
            return Err(ctx.fail("inputs must be real buffers"));
        };
        let (region, out) = ctx.real_output(0)?;
        let pairs = offsets_within(lhs.region, region).zip(offsets_within(rhs.region, region));
        match self.op {
            BinaryOp::Multiply => {
                for (dst, (i, j)) in out.iter_mut().zip(pairs) {
                    *dst = a[i] * b[j];
                }
            }
            BinaryOp::Divide(policy) => {
                for (dst, (i, j)) in out.iter_mut().zip(pairs) {
                    *dst = policy.divide(a[i], b[j]);
                }
            }
        }
        Ok(())
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        let BinaryOp::Divide(policy) = self.op else {
            return false;
        };
        match policy.with_parameter(key, value) {
            Some(policy) => {
                self.op = BinaryOp::Divide(policy);
                true
            }
            None => false,
        }
    }
}
